//! Broker bridge
//!
//! Forwards selected gateway events to the broker and routes broker commands
//! to the shard that owns them, wherever in the fleet that is.

mod forward;
mod route;

pub use forward::EventForwarder;
pub use route::{BrokerBridge, Delivery, Route};

/// Broker topic conventions shared by the whole fleet
pub mod topics {
    /// Commands addressed by guild ID, consumed by every process
    pub const SEND: &str = "SEND";

    /// Topic carrying commands for one shard
    pub fn shard(shard_id: u32) -> String {
        shard_id.to_string()
    }
}
