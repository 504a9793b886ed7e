//! Domain error types for the fleet gateway
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError>.
//!
//! Only `MetadataFetch` aborts a larger operation (fleet start). Every other
//! variant is terminal for the single message, command or shard task that
//! produced it and is surfaced through logging and the `gateway_errors_total`
//! counter.

use thiserror::Error;

/// Boxed transport error carried as a `#[source]`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Gateway domain errors
///
/// Every variant carries structured context fields for diagnostics.
///
/// Example log output:
/// ```text
/// GatewayError::ShardNotFound { shard_id: 3 }
/// → "shard 3 is not owned by this process"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Gateway bootstrap metadata could not be fetched
    #[error("gateway metadata fetch failed")]
    MetadataFetch(#[source] BoxError),

    /// Routing resolved to a shard that is not in the local registry
    #[error("shard {shard_id} is not owned by this process")]
    ShardNotFound { shard_id: u32 },

    /// Malformed payload from the broker or a remote process
    #[error("unable to parse {context}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Broker publish failed (or timed out) for a topic
    #[error("broker publish failed for topic '{topic}'")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },

    /// Broker subscription could not be established
    #[error("broker subscribe failed for topic '{topic}'")]
    Subscribe {
        topic: String,
        #[source]
        source: BoxError,
    },

    /// Broker connection failed
    #[error("broker connection failed")]
    BrokerConnection(#[source] BoxError),

    /// A shard's connection ended with an error
    #[error("shard {shard_id} stopped with an error")]
    ShardRuntime {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// A local shard rejected an outbound command
    #[error("shard {shard_id} rejected outbound command")]
    ShardSend {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// Broker topic is neither `SEND` nor a shard ID
    #[error("unexpected broker topic '{topic}'")]
    UnknownTopic { topic: String },

    /// Shard routing was attempted before the shard count was resolved
    #[error("shard count has not been resolved")]
    ShardCountUnresolved,

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total` counter.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::MetadataFetch(_) => "metadata_fetch",
            Self::ShardNotFound { .. } => "shard_not_found",
            Self::Parse { .. } => "parse",
            Self::Publish { .. } => "publish",
            Self::Subscribe { .. } => "subscribe",
            Self::BrokerConnection(_) => "broker_connection",
            Self::ShardRuntime { .. } => "shard_runtime",
            Self::ShardSend { .. } => "shard_send",
            Self::UnknownTopic { .. } => "unknown_topic",
            Self::ShardCountUnresolved => "shard_count_unresolved",
            Self::Config(_) => "config",
        }
    }

    /// Routing misses and malformed payloads are expected under normal
    /// operation and are logged at `warn` rather than `error`.
    pub fn is_routing_miss(&self) -> bool {
        matches!(
            self,
            Self::ShardNotFound { .. } | Self::Parse { .. } | Self::UnknownTopic { .. }
        )
    }

    pub(crate) fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }
}
