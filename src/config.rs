//! Gateway configuration module
//!
//! Loads process settings from `.env` and the environment, and validates the
//! fleet position of this process.

use crate::error::GatewayError;
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use twilight_gateway::Intents;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Discord bot token
    #[serde(alias = "discord_bot_token")]
    pub discord_token: String,

    /// Total shards across the fleet (0 = use Discord's recommended value)
    #[serde(default)]
    pub shard_count: u32,

    /// Number of cooperating gateway processes
    #[serde(default = "default_server_count")]
    pub server_count: u32,

    /// Position of this process in the fleet (0-indexed)
    #[serde(default)]
    pub server_index: u32,

    /// Gateway intents bitfield used by every shard
    #[serde(default = "default_intents")]
    pub intents: u64,

    /// NATS server URL(s) - comma-separated for multiple servers
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Timeout applied to every broker publish
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Dispatch event names forwarded to the broker
    #[serde(default)]
    pub forward_events: Vec<String>,

    /// Health/metrics HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_count() -> u32 {
    1
}

fn default_intents() -> u64 {
    (Intents::GUILDS | Intents::GUILD_MEMBERS).bits()
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_http_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let source = Config::builder()
            .add_source(
                Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("forward_events"),
            )
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Self::from_config(source)
    }

    /// Deserialize and validate from an already-built configuration source
    pub fn from_config(source: Config) -> Result<Self, GatewayError> {
        let config: Self = source.try_deserialize().map_err(|e| {
            GatewayError::Config(format!(
                "invalid gateway configuration (DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set): {e}"
            ))
        })?;

        // Fail at load time rather than at fleet construction
        config.fleet()?;

        Ok(config)
    }

    /// Fleet position of this process
    pub fn fleet(&self) -> Result<FleetConfig, GatewayError> {
        FleetConfig::new(self.shard_count, self.server_count, self.server_index)
    }

    /// Configured Discord intents
    pub fn intents(&self) -> Intents {
        Intents::from_bits_truncate(self.intents)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Allow-list of dispatch event names, blanks removed
    pub fn forward_events(&self) -> HashSet<String> {
        self.forward_events
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Position of this process within the fleet
///
/// `shard_count == 0` means the count is resolved from gateway metadata at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetConfig {
    pub shard_count: u32,
    pub server_count: u32,
    pub server_index: u32,
}

impl FleetConfig {
    pub fn new(shard_count: u32, server_count: u32, server_index: u32) -> Result<Self, GatewayError> {
        if server_count == 0 {
            return Err(GatewayError::Config(
                "SERVER_COUNT must be greater than zero".to_string(),
            ));
        }
        if server_index >= server_count {
            return Err(GatewayError::Config(format!(
                "SERVER_INDEX ({server_index}) must be less than SERVER_COUNT ({server_count})"
            )));
        }

        Ok(Self {
            shard_count,
            server_count,
            server_index,
        })
    }

    /// Single-process fleet
    pub fn standalone(shard_count: u32) -> Self {
        Self {
            shard_count,
            server_count: 1,
            server_index: 0,
        }
    }
}
