//! Broker → gateway path
//!
//! Commands arrive either on the fleet-wide `SEND` topic, addressed by guild,
//! or on a per-shard topic named after the decimal shard ID. A `SEND` command
//! whose shard lives elsewhere is re-published once to that shard's topic;
//! the owner is subscribed to it, so no second hop is ever needed.

use crate::bridge::forward::EventForwarder;
use crate::bridge::topics;
use crate::broker::Broker;
use crate::error::GatewayError;
use crate::events::{OutboundCommand, RoutedCommand, SendPacket};
use crate::metrics::{paths, GatewayMetrics};
use crate::shard::distributor::destination_shard;
use crate::shard::ShardFleet;

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a routed command ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent through a shard in this process
    Local { shard_id: u32 },
    /// Handed to the owning process via the shard's topic
    Republished { shard_id: u32 },
}

/// Resolution of a broker message before any side effects
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Local(RoutedCommand),
    Remote(RoutedCommand),
}

/// Bridges the local fleet and the broker
pub struct BrokerBridge {
    fleet: Arc<ShardFleet>,
    broker: Arc<dyn Broker>,
    events: HashSet<String>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl BrokerBridge {
    /// # Arguments
    /// * `fleet` - Local shard fleet
    /// * `broker` - Broker transport
    /// * `events` - Dispatch event names forwarded to the broker
    /// * `timeout` - Timeout for every publish
    /// * `metrics` - Prometheus metrics
    pub fn new(
        fleet: Arc<ShardFleet>,
        broker: Arc<dyn Broker>,
        events: HashSet<String>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fleet,
            broker,
            events,
            timeout,
            metrics,
        })
    }

    /// Outbound handler publishing this bridge's allow-listed events
    pub fn forwarder(&self) -> EventForwarder {
        EventForwarder::new(
            Arc::clone(&self.broker),
            self.events.clone(),
            self.timeout,
            self.fleet.state(),
            Arc::clone(&self.metrics),
        )
    }

    /// Install the outbound handler on the fleet and start one listening
    /// task for `SEND` plus one per locally owned shard.
    ///
    /// The shard count must already be resolved. Subscription tasks run for
    /// the life of the process; their handles are returned for callers that
    /// want to abort them.
    pub async fn connect(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, GatewayError> {
        let shard_ids = self.fleet.local_shard_ids()?;

        self.fleet
            .set_event_handler(Some(Arc::new(self.forwarder())))
            .await;

        if self.events.is_empty() {
            warn!("No events configured for forwarding; outbound path is idle");
        }

        let subscriptions = std::iter::once(topics::SEND.to_string())
            .chain(shard_ids.into_iter().map(topics::shard))
            .collect::<Vec<_>>();

        info!(topics = ?subscriptions, "Connecting broker bridge");

        let handles = subscriptions
            .into_iter()
            .map(|topic| tokio::spawn(Arc::clone(self).listen(topic)))
            .collect();

        Ok(handles)
    }

    /// Subscribe to `topic` and route every message received on it
    async fn listen(self: Arc<Self>, topic: String) {
        let mut stream = match self.broker.subscribe(&topic).await {
            Ok(stream) => stream,
            Err(e) => {
                self.metrics.record_error(e.error_type_label());
                error!(topic, error = %e, "Failed to subscribe to broker topic");
                return;
            }
        };

        while let Some(message) = stream.next().await {
            if let Err(e) = self.handle_message(&topic, &message.payload).await {
                self.report(&topic, &e);
            }
        }

        warn!(topic, "Broker subscription ended");
    }

    fn report(&self, topic: &str, e: &GatewayError) {
        self.metrics.record_error(e.error_type_label());
        if e.is_routing_miss() {
            warn!(topic, error = %e, "Dropping broker message");
        } else {
            error!(topic, error = %e, "Failed to route broker message");
        }
    }

    /// Route one broker message to a local shard or to its owner's topic
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Delivery, GatewayError> {
        match self.resolve(topic, payload)? {
            Route::Local(RoutedCommand { shard_id, command }) => {
                self.fleet.deliver_local(shard_id, &command).await?;
                self.metrics.record_command(paths::LOCAL);
                debug!(shard_id, op = command.op, "Delivered command locally");
                Ok(Delivery::Local { shard_id })
            }
            Route::Remote(RoutedCommand { shard_id, command }) => {
                let data = command.to_bytes()?;
                let shard_topic = topics::shard(shard_id);

                self.broker.publish(&shard_topic, data, self.timeout).await?;
                self.metrics.record_command(paths::REPUBLISHED);
                debug!(shard_id, op = command.op, "Re-published command to owning shard");
                Ok(Delivery::Republished { shard_id })
            }
        }
    }

    /// Decide where a message goes without delivering it
    pub fn resolve(&self, topic: &str, payload: &[u8]) -> Result<Route, GatewayError> {
        if topic == topics::SEND {
            let packet = SendPacket::from_slice(payload)?;
            let shard_count = self
                .fleet
                .shard_count()
                .ok_or(GatewayError::ShardCountUnresolved)?;

            let routed = RoutedCommand {
                shard_id: destination_shard(packet.guild_id, shard_count),
                command: packet.packet,
            };

            return Ok(if self.fleet.is_local(routed.shard_id) {
                Route::Local(routed)
            } else {
                Route::Remote(routed)
            });
        }

        let shard_id: u32 = topic.parse().map_err(|_| GatewayError::UnknownTopic {
            topic: topic.to_string(),
        })?;

        if !self.fleet.is_local(shard_id) {
            return Err(GatewayError::ShardNotFound { shard_id });
        }

        let command =
            OutboundCommand::from_slice(payload, format!("packet intended for shard {shard_id}"))?;

        Ok(Route::Local(RoutedCommand { shard_id, command }))
    }
}
