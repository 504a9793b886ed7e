//! Gateway and broker wire types
//!
//! Inbound frames arrive from shard connections; outbound commands arrive
//! from the broker and are routed to the owning shard.

pub mod packet;

pub use packet::{InboundEvent, OutboundCommand, RoutedCommand, SendPacket, DISPATCH_OPCODE};
