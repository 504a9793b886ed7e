//! Shard seams
//!
//! The fleet drives shards only through these traits, so the connection
//! protocol (handshake, heartbeat, resume) stays inside the implementation.

use crate::error::GatewayError;
use crate::events::{InboundEvent, OutboundCommand};
use crate::metadata::{GatewayMetadata, SessionStartLimit};
use crate::metrics::GatewayMetrics;
use crate::shard::state::ShardState;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use twilight_gateway::Intents;

/// A single gateway connection
///
/// `open` blocks for the connection's whole lifetime; `close` may be called
/// from another task to end it.
#[async_trait]
pub trait Shard: Send + Sync {
    async fn open(&self) -> Result<(), GatewayError>;

    async fn close(&self) -> Result<(), GatewayError>;

    async fn send(&self, command: &OutboundCommand) -> Result<(), GatewayError>;
}

/// Builds shards from per-shard configuration
pub trait ShardFactory: Send + Sync {
    fn create(&self, config: ShardConfig, events: ShardEvents) -> Result<Arc<dyn Shard>, GatewayError>;
}

/// Receives every event from every local shard
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, shard_id: u32, event: InboundEvent);
}

/// Single handler slot shared by all shard tasks
pub(crate) type HandlerSlot = Arc<RwLock<Option<Arc<dyn EventHandler>>>>;

/// Settings shared by every shard in the process
#[derive(Debug, Clone)]
pub struct ShardTemplate {
    pub token: String,
    pub intents: Intents,
}

impl ShardTemplate {
    pub fn new(token: String, intents: Intents) -> Self {
        Self { token, intents }
    }

    /// Clone the template for one shard identity
    pub fn configure(&self, shard_id: u32, total_shards: u32, metadata: &GatewayMetadata) -> ShardConfig {
        ShardConfig {
            shard_id,
            total_shards,
            gateway_url: metadata.url.clone(),
            session_start_limit: metadata.session_start_limit,
            template: self.clone(),
        }
    }
}

/// Configuration for one shard
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub shard_id: u32,
    pub total_shards: u32,
    pub gateway_url: String,
    /// Identify budget from the process-wide metadata
    pub session_start_limit: SessionStartLimit,
    pub template: ShardTemplate,
}

/// Event sink handed to each shard
///
/// Dispatch awaits the installed handler inline, so events from one shard are
/// handled in the order the connection produced them.
#[derive(Clone)]
pub struct ShardEvents {
    shard_id: u32,
    handler: HandlerSlot,
    state: ShardState,
    metrics: Arc<GatewayMetrics>,
}

impl ShardEvents {
    pub(crate) fn new(
        shard_id: u32,
        handler: HandlerSlot,
        state: ShardState,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            shard_id,
            handler,
            state,
            metrics,
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Record the event and pass it to the installed handler, if any
    pub async fn dispatch(&self, event: InboundEvent) {
        self.state.record_event(self.shard_id);
        self.metrics.record_event(self.shard_id, event.op);

        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            handler.handle(self.shard_id, event).await;
        }
    }
}
