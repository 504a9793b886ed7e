//! Gateway bootstrap metadata
//!
//! The recommended shard count and connection URL come from Discord's
//! `GET /gateway/bot`. The result is memoized for the life of the process.

use crate::error::GatewayError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Bootstrap information for connecting shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMetadata {
    /// Gateway WebSocket URL
    pub url: String,
    /// Recommended total shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget for the bot, shared by every shard in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStartLimit {
    /// Identify requests allowed per 5 seconds
    pub max_concurrency: u16,
    /// Session starts left in the current window
    pub remaining: u32,
    /// Time until `remaining` resets to `total`
    pub reset_after: Duration,
    /// Session starts allowed per window
    pub total: u32,
}

impl SessionStartLimit {
    /// One identify at a time with a full daily budget
    pub fn single(total: u32) -> Self {
        Self {
            max_concurrency: 1,
            remaining: total,
            reset_after: Duration::ZERO,
            total,
        }
    }
}

/// Source of gateway metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch_bootstrap_metadata(&self) -> Result<GatewayMetadata, GatewayError>;
}

/// Metadata source backed by the Discord REST API
pub struct TwilightMetadataSource {
    client: twilight_http::Client,
}

impl TwilightMetadataSource {
    pub fn new(token: String) -> Self {
        Self {
            client: twilight_http::Client::new(token),
        }
    }
}

#[async_trait]
impl MetadataSource for TwilightMetadataSource {
    async fn fetch_bootstrap_metadata(&self) -> Result<GatewayMetadata, GatewayError> {
        let info = self
            .client
            .gateway()
            .authed()
            .await
            .map_err(|e| GatewayError::MetadataFetch(Box::new(e)))?
            .model()
            .await
            .map_err(|e| GatewayError::MetadataFetch(Box::new(e)))?;

        info!(
            shards = info.shards,
            max_concurrency = info.session_start_limit.max_concurrency,
            remaining_sessions = info.session_start_limit.remaining,
            "Fetched gateway metadata"
        );

        let limit = info.session_start_limit;
        Ok(GatewayMetadata {
            url: info.url,
            shards: info.shards,
            session_start_limit: SessionStartLimit {
                max_concurrency: limit.max_concurrency,
                remaining: limit.remaining,
                reset_after: Duration::from_millis(limit.reset_after),
                total: limit.total,
            },
        })
    }
}

/// Memoized metadata fetch
///
/// The lock guards only the check and the store. Concurrent first callers
/// may each fetch; the first committed value wins and is returned to all of
/// them. Failures are never cached.
pub struct GatewayMetadataCache {
    source: Arc<dyn MetadataSource>,
    cached: Mutex<Option<GatewayMetadata>>,
}

impl GatewayMetadataCache {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached metadata, fetching it on first use
    pub async fn fetch(&self) -> Result<GatewayMetadata, GatewayError> {
        if let Some(metadata) = self.cached.lock().await.as_ref() {
            return Ok(metadata.clone());
        }

        debug!("Gateway metadata not cached, fetching");
        let fetched = self.source.fetch_bootstrap_metadata().await?;

        let mut cached = self.cached.lock().await;
        Ok(cached.get_or_insert(fetched).clone())
    }

    /// Cached value, if one has been committed
    pub async fn cached(&self) -> Option<GatewayMetadata> {
        self.cached.lock().await.clone()
    }
}
