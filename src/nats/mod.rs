//! NATS integration
//!
//! Core NATS pub/sub implementation of the broker.

mod broker;

pub use broker::NatsBroker;
