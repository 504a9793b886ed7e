//! Prometheus metrics module
//!
//! Recording goes through the global `metrics` recorder. A detached instance
//! (no recorder installed) records into the no-op recorder, which is what
//! tests and embedders use.

use crate::error::GatewayError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Routing outcome label for `gateway_commands_routed_total`
pub mod paths {
    /// Delivered to a shard owned by this process
    pub const LOCAL: &str = "local";
    /// Re-published to the owning process's shard topic
    pub const REPUBLISHED: &str = "republished";
}

/// Gateway metrics collector
#[derive(Clone, Default)]
pub struct GatewayMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl GatewayMetrics {
    /// Install the Prometheus recorder and return a rendering handle
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::Config(format!("failed to install Prometheus recorder: {e}")))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Metrics without an exporter
    pub fn detached() -> Self {
        Self::default()
    }

    /// Register metric descriptions
    fn register_metrics() {
        describe_counter!(
            "gateway_events_received_total",
            Unit::Count,
            "Total gateway frames received from Discord"
        );
        describe_counter!(
            "gateway_events_forwarded_total",
            Unit::Count,
            "Dispatch events published to the broker"
        );
        describe_counter!(
            "gateway_forward_failures_total",
            Unit::Count,
            "Dispatch events that failed to publish"
        );
        describe_counter!(
            "gateway_commands_routed_total",
            Unit::Count,
            "Outbound commands delivered locally or re-published"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total gateway errors"
        );

        describe_histogram!(
            "gateway_broker_publish_duration_seconds",
            Unit::Seconds,
            "Time to publish a message to the broker"
        );

        describe_gauge!(
            "gateway_shards_running",
            Unit::Count,
            "Shard tasks running in this process"
        );
        describe_gauge!(
            "gateway_shards_open",
            Unit::Count,
            "Shards with an open connection"
        );
        describe_gauge!(
            "gateway_broker_connected",
            Unit::Count,
            "Broker connection status (1=connected, 0=disconnected)"
        );
    }

    /// Record a frame received on a shard
    pub fn record_event(&self, shard_id: u32, op: u8) {
        counter!(
            "gateway_events_received_total",
            "shard_id" => shard_id.to_string(),
            "op" => op.to_string()
        )
        .increment(1);
    }

    /// Record a dispatch event published to the broker
    pub fn record_forward(&self, event: &str, duration: Duration) {
        counter!(
            "gateway_events_forwarded_total",
            "event" => event.to_string()
        )
        .increment(1);

        histogram!("gateway_broker_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed forward
    pub fn record_forward_failure(&self, event: &str) {
        counter!(
            "gateway_forward_failures_total",
            "event" => event.to_string()
        )
        .increment(1);
    }

    /// Record a routed outbound command
    pub fn record_command(&self, path: &'static str) {
        counter!("gateway_commands_routed_total", "path" => path).increment(1);
    }

    /// Record gateway error
    pub fn record_error(&self, error_type: &'static str) {
        counter!("gateway_errors_total", "error_type" => error_type).increment(1);
    }

    /// Set running shard task count
    pub fn set_shards_running(&self, count: usize) {
        gauge!("gateway_shards_running").set(count as f64);
    }

    /// Set open shard count
    pub fn set_shards_open(&self, server_index: u32, count: usize) {
        gauge!(
            "gateway_shards_open",
            "server_index" => server_index.to_string()
        )
        .set(count as f64);
    }

    /// Set broker connection status
    pub fn set_broker_connected(&self, connected: bool) {
        gauge!("gateway_broker_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
