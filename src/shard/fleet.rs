//! Shard fleet implementation
//!
//! Owns the shards this process is responsible for. Ownership is computed
//! from the fleet position alone (see `distributor`), so every process agrees
//! on who runs which shard without talking to each other.

use crate::config::FleetConfig;
use crate::error::GatewayError;
use crate::events::OutboundCommand;
use crate::metadata::GatewayMetadataCache;
use crate::metrics::GatewayMetrics;
use crate::shard::distributor::{expected_local_count, local_shard_ids};
use crate::shard::handle::{EventHandler, HandlerSlot, Shard, ShardEvents, ShardFactory, ShardTemplate};
use crate::shard::state::{ShardPhase, ShardState};

use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Registry and supervisor of locally owned shards
pub struct ShardFleet {
    config: FleetConfig,
    shard_count: OnceLock<u32>,
    template: ShardTemplate,
    metadata: Arc<GatewayMetadataCache>,
    factory: Arc<dyn ShardFactory>,
    shards: DashMap<u32, Arc<dyn Shard>>,
    handler: HandlerSlot,
    state: ShardState,
    metrics: Arc<GatewayMetrics>,
}

impl ShardFleet {
    /// Create a fleet member
    ///
    /// # Arguments
    /// * `config` - Fleet position; a zero shard count is resolved from metadata
    /// * `template` - Settings cloned into every shard's configuration
    /// * `metadata` - Shared gateway metadata cache
    /// * `factory` - Builds the shard connections
    /// * `metrics` - Prometheus metrics
    pub fn new(
        config: FleetConfig,
        template: ShardTemplate,
        metadata: Arc<GatewayMetadataCache>,
        factory: Arc<dyn ShardFactory>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let shard_count = OnceLock::new();
        if config.shard_count > 0 {
            let _ = shard_count.set(config.shard_count);
        }

        Self {
            config,
            shard_count,
            template,
            metadata,
            factory,
            shards: DashMap::new(),
            handler: Arc::new(RwLock::new(None)),
            state: ShardState::new(config.server_index),
            metrics,
        }
    }

    pub fn config(&self) -> FleetConfig {
        self.config
    }

    /// Get shared state (for health checks)
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    /// Total shard count, once resolved
    pub fn shard_count(&self) -> Option<u32> {
        self.shard_count.get().copied()
    }

    /// Resolve the total shard count, fetching gateway metadata if it was
    /// not configured. The first resolved value is kept for the process
    /// lifetime.
    pub async fn resolve_shard_count(&self) -> Result<u32, GatewayError> {
        if let Some(count) = self.shard_count() {
            return Ok(count);
        }

        let metadata = self.metadata.fetch().await?;
        if metadata.shards == 0 {
            return Err(GatewayError::MetadataFetch(
                "gateway metadata recommended zero shards".into(),
            ));
        }

        info!(
            shards = metadata.shards,
            "Shard count unspecified: using Discord recommended value"
        );

        let _ = self.shard_count.set(metadata.shards);
        self.shard_count()
            .ok_or(GatewayError::ShardCountUnresolved)
    }

    /// Shard IDs owned by this process
    pub fn local_shard_ids(&self) -> Result<Vec<u32>, GatewayError> {
        let total = self.shard_count().ok_or(GatewayError::ShardCountUnresolved)?;
        Ok(local_shard_ids(total, self.config.server_count, self.config.server_index).collect())
    }

    /// Whether `shard_id` is registered in this process
    pub fn is_local(&self, shard_id: u32) -> bool {
        self.shards.contains_key(&shard_id)
    }

    /// Install the handler for inbound events from every local shard
    ///
    /// Only one handler is active; installing replaces the previous one.
    pub async fn set_event_handler(&self, handler: Option<Arc<dyn EventHandler>>) {
        *self.handler.write().await = handler;
    }

    /// Shard tasks currently running
    pub fn running_shards(&self) -> usize {
        self.state.running_shards()
    }

    /// Run all locally owned shards
    ///
    /// Spawns a task for each owned shard and waits for all of them to
    /// complete. Only a failure to resolve the shard count is returned;
    /// per-shard failures are logged.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        let total = self.resolve_shard_count().await?;
        let FleetConfig {
            server_count,
            server_index,
            ..
        } = self.config;

        let expected = expected_local_count(total, server_count, server_index);
        info!(
            server_index,
            server_count,
            "Starting {expected} shard(s) out of {total} total"
        );

        let mut handles = Vec::with_capacity(expected as usize);

        for shard_id in local_shard_ids(total, server_count, server_index) {
            let fleet = Arc::clone(self);

            let handle = tokio::spawn(async move {
                let _running = RunningGuard::enter(&fleet.state, &fleet.metrics);

                match Arc::clone(&fleet).run_shard(shard_id, total).await {
                    Ok(()) => debug!(shard_id, "Shard closing gracefully"),
                    Err(e) => {
                        fleet.metrics.record_error(e.error_type_label());
                        error!(shard_id, error = %e, "Fatal error in shard");
                    }
                }
            });

            handles.push(handle);
        }

        // Wait for all shards
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Shard task panicked");
            }
        }

        info!(server_index, "All local shards stopped");
        Ok(())
    }

    /// Build, register and run one shard until its connection ends
    async fn run_shard(self: Arc<Self>, shard_id: u32, total: u32) -> Result<(), GatewayError> {
        let metadata = self.metadata.fetch().await?;
        let config = self.template.configure(shard_id, total, &metadata);
        let events = ShardEvents::new(
            shard_id,
            Arc::clone(&self.handler),
            self.state.clone(),
            Arc::clone(&self.metrics),
        );

        let shard = self.factory.create(config, events)?;
        self.state.register(shard_id);
        self.shards.insert(shard_id, Arc::clone(&shard));

        info!(shard_id, total, "Shard starting");
        self.state.set_phase(shard_id, ShardPhase::Opening);

        let opened = shard.open().await;

        self.state.set_phase(shard_id, ShardPhase::Closing);
        let closed = shard.close().await;
        self.state.set_phase(shard_id, ShardPhase::Closed);

        match (opened, closed) {
            (Err(e), Err(close_err)) => {
                debug!(shard_id, error = %close_err, "Close after failed open also failed");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Send a command through a locally owned shard
    pub async fn deliver_local(&self, shard_id: u32, command: &OutboundCommand) -> Result<(), GatewayError> {
        let shard = self
            .shards
            .get(&shard_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(GatewayError::ShardNotFound { shard_id })?;

        shard.send(command).await?;
        self.state.record_delivery(shard_id);
        Ok(())
    }

    /// Request a graceful close of every registered shard
    pub async fn close_all(&self) {
        let shards: Vec<(u32, Arc<dyn Shard>)> = self
            .shards
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        for (shard_id, shard) in shards {
            if self.state.phase(shard_id).is_some_and(|p| p.is_finished()) {
                continue;
            }
            if let Err(e) = shard.close().await {
                warn!(shard_id, error = %e, "Failed to close shard");
            }
        }
    }
}

/// Keeps the running-shard gauge balanced even if a shard task panics
struct RunningGuard<'a> {
    state: &'a ShardState,
    metrics: &'a GatewayMetrics,
}

impl<'a> RunningGuard<'a> {
    fn enter(state: &'a ShardState, metrics: &'a GatewayMetrics) -> Self {
        metrics.set_shards_running(state.shard_started());
        Self { state, metrics }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.metrics.set_shards_running(self.state.shard_stopped());
    }
}
