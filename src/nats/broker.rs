//! NATS broker
//!
//! Topics map one-to-one onto NATS subjects: dispatch events go out under
//! their event name, commands arrive on `SEND` and on per-shard subjects.

use crate::broker::{Broker, BrokerMessage, MessageStream};
use crate::error::{BoxError, GatewayError};
use async_nats::connection::State;
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// NATS-backed broker
pub struct NatsBroker {
    client: Client,
    closed: AtomicBool,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl NatsBroker {
    /// Connect to NATS server
    pub async fn connect(servers: &str) -> Result<Arc<Self>, GatewayError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| GatewayError::BrokerConnection(Box::new(e)))?;

        Ok(Arc::new(Self {
            client,
            closed: AtomicBool::new(false),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && matches!(self.client.connection_state(), State::Connected)
    }

    /// Get total messages published
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Get total publish failures
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Graceful shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        self.closed.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.drain().await {
            warn!(error = %e, "Failed to drain NATS connection");
        }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, payload: Bytes, timeout: Duration) -> Result<(), GatewayError> {
        debug!(topic, bytes = payload.len(), "Publishing message");

        let publish = async {
            self.client
                .publish(topic.to_string(), payload)
                .await
                .map_err(|e| Box::new(e) as BoxError)?;
            self.client
                .flush()
                .await
                .map_err(|e| Box::new(e) as BoxError)
        };

        let source = match tokio::time::timeout(timeout, publish).await {
            Ok(Ok(())) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Ok(Err(source)) => source,
            Err(elapsed) => Box::new(elapsed) as BoxError,
        };

        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        Err(GatewayError::Publish {
            topic: topic.to_string(),
            source,
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, GatewayError> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| GatewayError::Subscribe {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        info!(topic, "Subscribed to broker topic");

        let stream = subscriber.map(|message| BrokerMessage {
            topic: message.subject.to_string(),
            payload: message.payload,
        });

        Ok(Box::pin(stream))
    }
}
