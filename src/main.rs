//! Fleet Gateway binary
//!
//! Wires configuration, the shard fleet, the NATS bridge and the
//! health/metrics server together.

use anyhow::Result;
use fleet_gateway::bridge::BrokerBridge;
use fleet_gateway::broker::Broker;
use fleet_gateway::config::GatewayConfig;
use fleet_gateway::health::{self, AppState};
use fleet_gateway::metadata::{GatewayMetadataCache, TwilightMetadataSource};
use fleet_gateway::metrics::GatewayMetrics;
use fleet_gateway::nats::NatsBroker;
use fleet_gateway::shard::{ShardFleet, ShardTemplate, TwilightShardFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Time allowed for shards to finish after a close request
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let gateway_config = GatewayConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("fleet_gateway={}", gateway_config.log_level).parse()?)
                .add_directive("twilight_gateway=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    let fleet_config = gateway_config.fleet()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server_index = fleet_config.server_index,
        server_count = fleet_config.server_count,
        shard_count = fleet_config.shard_count,
        "Starting Fleet Gateway"
    );

    let metrics = Arc::new(GatewayMetrics::install()?);
    info!("Prometheus metrics initialized");

    let metadata = Arc::new(GatewayMetadataCache::new(Arc::new(
        TwilightMetadataSource::new(gateway_config.discord_token.clone()),
    )));

    let intents = gateway_config.intents();
    info!(?intents, "Using Discord intents");

    let fleet = Arc::new(ShardFleet::new(
        fleet_config,
        ShardTemplate::new(gateway_config.discord_token.clone(), intents),
        metadata,
        Arc::new(TwilightShardFactory::default()),
        Arc::clone(&metrics),
    ));

    // The bridge subscribes per owned shard, so the count must be known first
    let shard_count = fleet.resolve_shard_count().await?;
    info!(shard_count, "Shard count resolved");

    // Connect to NATS if configured
    let broker = if let Some(ref url) = gateway_config.nats_url {
        match NatsBroker::connect(url).await {
            Ok(broker) => {
                info!(url, "Connected to NATS");
                metrics.set_broker_connected(true);
                Some(broker)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - running in local mode");
                metrics.set_broker_connected(false);
                None
            }
        }
    } else {
        info!("No NATS_URL configured - running in local mode");
        None
    };

    let subscriptions = match broker {
        Some(ref broker) => {
            let bridge = BrokerBridge::new(
                Arc::clone(&fleet),
                Arc::clone(broker) as Arc<dyn Broker>,
                gateway_config.forward_events(),
                gateway_config.publish_timeout(),
                Arc::clone(&metrics),
            );
            bridge.connect().await?
        }
        None => Vec::new(),
    };

    // Start health server
    let app_state = AppState {
        fleet: Arc::clone(&fleet),
        broker: broker.clone(),
        metrics: Arc::clone(&metrics),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], gateway_config.http_port).into();

    info!(port = gateway_config.http_port, "Starting HTTP server");

    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health_router,
    );

    let fleet_run = fleet.start();
    tokio::pin!(fleet_run);

    // Run everything concurrently
    tokio::select! {
        result = &mut fleet_run => {
            if let Err(e) = result {
                error!(error = %e, "Shard fleet error");
            }
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            fleet.close_all().await;
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut fleet_run).await.is_err() {
                warn!("Shards did not stop within the shutdown grace period");
            }
        }
    }

    // Graceful shutdown
    info!("Shutting down gateway...");

    for subscription in subscriptions {
        subscription.abort();
    }

    if let Some(ref broker) = broker {
        broker.close().await;
    }

    info!("Gateway shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
