//! Shard management module
//!
//! Ownership calculation, the shard seams, and the fleet that runs every
//! shard this process owns.

pub mod distributor;
mod fleet;
mod handle;
mod state;
mod twilight;

pub use fleet::ShardFleet;
pub use handle::{EventHandler, Shard, ShardConfig, ShardEvents, ShardFactory, ShardTemplate};
pub use state::{ShardPhase, ShardState};
pub use twilight::{TwilightShard, TwilightShardFactory};
