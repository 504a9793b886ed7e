//! Shard ownership across the fleet
//!
//! Every process computes the same functions from shared configuration, so
//! there is no coordinator: process `server_index` owns every shard ID
//! congruent to it modulo `server_count`, and a guild's traffic belongs to
//! shard `(guild_id >> 22) % shard_count`.

/// Number of shards owned by `server_index`.
///
/// The remainder of `shard_count / server_count` goes to the lowest indices.
pub fn expected_local_count(shard_count: u32, server_count: u32, server_index: u32) -> u32 {
    let base = shard_count / server_count;
    if server_index < shard_count % server_count {
        base + 1
    } else {
        base
    }
}

/// Shard IDs owned by `server_index`, ascending.
pub fn local_shard_ids(
    shard_count: u32,
    server_count: u32,
    server_index: u32,
) -> impl Iterator<Item = u32> {
    (server_index..shard_count).step_by(server_count as usize)
}

/// Shard that owns traffic for `routing_key`.
///
/// # Panics
///
/// Panics if `shard_count` is zero; routing before the shard count is
/// resolved is a programming error.
pub fn destination_shard(routing_key: u64, shard_count: u32) -> u32 {
    assert!(shard_count > 0, "destination_shard called with zero shards");
    // Result is < shard_count, so it fits in u32
    ((routing_key >> 22) % u64::from(shard_count)) as u32
}
