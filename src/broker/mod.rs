//! Broker abstraction
//!
//! Topic-addressed publish/subscribe used to move events and commands
//! between processes. Delivery guarantees belong to the transport.

use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Message received on a subscribed topic
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Messages on one subscribed topic
pub type MessageStream = Pin<Box<dyn Stream<Item = BrokerMessage> + Send>>;

/// Publish/subscribe transport
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` under `topic`, failing if not done within `timeout`.
    async fn publish(&self, topic: &str, payload: Bytes, timeout: Duration) -> Result<(), GatewayError>;

    /// Subscribe to `topic`. The stream ends when the subscription does.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, GatewayError>;
}
