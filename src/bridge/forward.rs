//! Gateway → broker path

use crate::broker::Broker;
use crate::events::InboundEvent;
use crate::metrics::GatewayMetrics;
use crate::shard::{EventHandler, ShardState};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace};

/// Publishes allow-listed dispatch events under their event name
///
/// Publish failures are logged and counted; the event is not retried and the
/// shard is not slowed down.
pub struct EventForwarder {
    broker: Arc<dyn Broker>,
    events: HashSet<String>,
    timeout: Duration,
    state: ShardState,
    metrics: Arc<GatewayMetrics>,
}

impl EventForwarder {
    pub fn new(
        broker: Arc<dyn Broker>,
        events: HashSet<String>,
        timeout: Duration,
        state: ShardState,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            broker,
            events,
            timeout,
            state,
            metrics,
        }
    }

    pub fn forwards(&self, event: &InboundEvent) -> bool {
        event
            .dispatch_name()
            .is_some_and(|name| self.events.contains(name))
    }
}

#[async_trait]
impl EventHandler for EventForwarder {
    async fn handle(&self, shard_id: u32, event: InboundEvent) {
        let Some(name) = event
            .dispatch_name()
            .filter(|name| self.events.contains(*name))
        else {
            trace!(shard_id, op = event.op, event = ?event.event, "Event not forwarded");
            return;
        };

        let start = Instant::now();
        match self
            .broker
            .publish(name, event.payload.clone(), self.timeout)
            .await
        {
            Ok(()) => {
                self.state.record_forward(shard_id);
                self.metrics.record_forward(name, start.elapsed());
            }
            Err(e) => {
                self.state.record_forward_failure(shard_id);
                self.metrics.record_forward_failure(name);
                self.metrics.record_error(e.error_type_label());
                error!(shard_id, event = name, error = %e, "Failed to publish packet to broker");
            }
        }
    }
}
