//! Shard connections over twilight-gateway

use crate::error::GatewayError;
use crate::events::{InboundEvent, OutboundCommand};
use crate::metadata::SessionStartLimit;
use crate::shard::handle::{Shard, ShardConfig, ShardEvents, ShardFactory};

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use twilight_gateway::error::ReceiveMessageErrorType;
use twilight_gateway::queue::InMemoryQueue;
use twilight_gateway::{CloseFrame, ConfigBuilder, Message, MessageSender};
use twilight_model::gateway::ShardId;

/// Consecutive receive errors before the shard is declared dead
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Builds [`TwilightShard`]s
///
/// Every shard built by one factory identifies through the same queue, so
/// the process as a whole stays within the bot's session start limit.
#[derive(Default)]
pub struct TwilightShardFactory {
    identify: OnceLock<(SessionStartLimit, InMemoryQueue)>,
}

impl TwilightShardFactory {
    /// Limit the shared identify queue was built from, once a shard exists
    pub fn identify_limit(&self) -> Option<SessionStartLimit> {
        self.identify.get().map(|(limit, _)| *limit)
    }

    fn identify_queue(&self, limit: SessionStartLimit) -> InMemoryQueue {
        let (_, queue) = self.identify.get_or_init(|| {
            info!(
                max_concurrency = limit.max_concurrency,
                remaining = limit.remaining,
                total = limit.total,
                "Creating shared identify queue"
            );
            let queue = InMemoryQueue::new(
                limit.max_concurrency.max(1),
                limit.remaining.min(limit.total),
                limit.reset_after,
                limit.total,
            );
            (limit, queue)
        });
        queue.clone()
    }
}

impl ShardFactory for TwilightShardFactory {
    fn create(&self, config: ShardConfig, events: ShardEvents) -> Result<Arc<dyn Shard>, GatewayError> {
        let shard_id = ShardId::new_checked(config.shard_id, config.total_shards).ok_or_else(|| {
            GatewayError::Config(format!(
                "shard {} is out of range for {} total shards",
                config.shard_id, config.total_shards
            ))
        })?;

        let gateway_config = ConfigBuilder::new(config.template.token, config.template.intents)
            .proxy_url(config.gateway_url)
            .queue(self.identify_queue(config.session_start_limit))
            .build();

        let shard = twilight_gateway::Shard::with_config(shard_id, gateway_config);
        Ok(Arc::new(TwilightShard::new(config.shard_id, shard, events)))
    }
}

/// A Discord gateway connection
///
/// The underlying shard is locked for the whole of `open`; `close` and `send`
/// go through the shard's message sender and never contend with it.
pub struct TwilightShard {
    shard_id: u32,
    shard: Mutex<twilight_gateway::Shard>,
    sender: MessageSender,
    events: ShardEvents,
    closing: AtomicBool,
}

impl TwilightShard {
    pub fn new(shard_id: u32, shard: twilight_gateway::Shard, events: ShardEvents) -> Self {
        let sender = shard.sender();
        Self {
            shard_id,
            shard: Mutex::new(shard),
            sender,
            events,
            closing: AtomicBool::new(false),
        }
    }

    /// Whether a graceful close has been requested
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Shard for TwilightShard {
    async fn open(&self) -> Result<(), GatewayError> {
        let shard_id = self.shard_id;
        let mut shard = self.shard.lock().await;
        let mut consecutive_errors: u32 = 0;

        while let Some(item) = shard.next().await {
            let message = match item {
                Ok(message) => {
                    consecutive_errors = 0;
                    message
                }
                Err(source) => {
                    consecutive_errors += 1;
                    warn!(shard_id, error = %source, consecutive = consecutive_errors, "Error receiving message");

                    if matches!(source.kind(), ReceiveMessageErrorType::Reconnect) {
                        error!(shard_id, "Fatal gateway error (reconnect failed)");
                        return Err(GatewayError::ShardRuntime {
                            shard_id,
                            source: Box::new(source),
                        });
                    }

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(shard_id, consecutive = consecutive_errors, "Consecutive error threshold exceeded");
                        return Err(GatewayError::ShardRuntime {
                            shard_id,
                            source: Box::new(source),
                        });
                    }

                    continue;
                }
            };

            match message {
                Message::Text(text) => match InboundEvent::from_frame(&text) {
                    Ok(event) => self.events.dispatch(event).await,
                    Err(e) => warn!(shard_id, error = %e, "Dropping undecodable gateway frame"),
                },
                Message::Close(frame) => {
                    debug!(shard_id, ?frame, "Gateway connection closed");
                    if self.is_closing() {
                        break;
                    }
                }
            }
        }

        info!(shard_id, "Shard connection ended");
        Ok(())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.closing.store(true, Ordering::SeqCst);

        if self.sender.is_closed() {
            return Ok(());
        }

        self.sender
            .close(CloseFrame::NORMAL)
            .map_err(|e| GatewayError::ShardRuntime {
                shard_id: self.shard_id,
                source: Box::new(e),
            })
    }

    async fn send(&self, command: &OutboundCommand) -> Result<(), GatewayError> {
        let json = command.to_json()?;
        debug!(shard_id = self.shard_id, op = command.op, "Sending command");

        self.sender.send(json).map_err(|e| GatewayError::ShardSend {
            shard_id: self.shard_id,
            source: Box::new(e),
        })
    }
}
