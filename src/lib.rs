//! Fleet Gateway - fleet-partitioned Discord gateway
//!
//! A fleet of gateway processes splits the shards of one bot between them:
//! - Each process owns the shards congruent to its index (no coordinator)
//! - Owned shards run concurrently until their connections end
//! - Selected dispatch events are published to NATS
//! - Commands from NATS reach the owning shard, locally or after one re-publish

pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metadata;
pub mod metrics;
pub mod nats;
pub mod shard;

pub use error::GatewayError;
