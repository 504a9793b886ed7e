//! In-memory collaborators for fleet and bridge tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use fleet_gateway::broker::{Broker, BrokerMessage, MessageStream};
use fleet_gateway::config::FleetConfig;
use fleet_gateway::events::{InboundEvent, OutboundCommand};
use fleet_gateway::metadata::{GatewayMetadata, GatewayMetadataCache, MetadataSource, SessionStartLimit};
use fleet_gateway::metrics::GatewayMetrics;
use fleet_gateway::shard::{EventHandler, Shard, ShardConfig, ShardEvents, ShardFactory, ShardFleet, ShardTemplate};
use fleet_gateway::GatewayError;
use futures::channel::mpsc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use twilight_gateway::Intents;

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Metadata source counting external calls
pub struct MockSource {
    pub calls: AtomicUsize,
    pub shards: u32,
    pub fail: AtomicBool,
}

impl MockSource {
    pub fn new(shards: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            shards,
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        let source = Self::new(0);
        source.fail.store(true, Ordering::SeqCst);
        source
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSource for MockSource {
    async fn fetch_bootstrap_metadata(&self) -> Result<GatewayMetadata, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::MetadataFetch("gateway unavailable".into()));
        }
        Ok(GatewayMetadata {
            url: GATEWAY_URL.to_string(),
            shards: self.shards,
            session_start_limit: SessionStartLimit::single(1000),
        })
    }
}

/// Shard that replays scripted events, then optionally stays open until closed
pub struct MockShard {
    pub id: u32,
    events: ShardEvents,
    script: Vec<InboundEvent>,
    hold_open: bool,
    fail_open: bool,
    closed: Notify,
    pub close_calls: AtomicUsize,
    pub sent: Mutex<Vec<OutboundCommand>>,
}

impl MockShard {
    pub fn sent(&self) -> Vec<OutboundCommand> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Shard for MockShard {
    async fn open(&self) -> Result<(), GatewayError> {
        for event in &self.script {
            self.events.dispatch(event.clone()).await;
        }
        if self.fail_open {
            return Err(GatewayError::ShardRuntime {
                shard_id: self.id,
                source: "connection reset".into(),
            });
        }
        if self.hold_open {
            self.closed.notified().await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.notify_one();
        Ok(())
    }

    async fn send(&self, command: &OutboundCommand) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Factory recording every shard it builds
#[derive(Default)]
pub struct MockFactory {
    pub hold_open: bool,
    pub fail_open: HashSet<u32>,
    pub script: Vec<InboundEvent>,
    pub shards: Mutex<HashMap<u32, Arc<MockShard>>>,
    pub configs: Mutex<Vec<ShardConfig>>,
}

impl MockFactory {
    pub fn holding() -> Arc<Self> {
        Arc::new(Self {
            hold_open: true,
            ..Default::default()
        })
    }

    pub fn shard(&self, id: u32) -> Option<Arc<MockShard>> {
        self.shards.lock().unwrap().get(&id).cloned()
    }

    pub fn created_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn total_sent(&self) -> usize {
        self.shards
            .lock()
            .unwrap()
            .values()
            .map(|s| s.sent.lock().unwrap().len())
            .sum()
    }
}

impl ShardFactory for MockFactory {
    fn create(&self, config: ShardConfig, events: ShardEvents) -> Result<Arc<dyn Shard>, GatewayError> {
        let shard = Arc::new(MockShard {
            id: config.shard_id,
            events,
            script: self.script.clone(),
            hold_open: self.hold_open,
            fail_open: self.fail_open.contains(&config.shard_id),
            closed: Notify::new(),
            close_calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        });

        self.shards
            .lock()
            .unwrap()
            .insert(config.shard_id, Arc::clone(&shard));
        self.configs.lock().unwrap().push(config);
        Ok(shard)
    }
}

/// In-memory bus: publishes are recorded and fanned out to subscribers
#[derive(Default)]
pub struct MockBroker {
    pub published: Mutex<Vec<(String, Bytes)>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BrokerMessage>>>>,
    pub fail_publish: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscribed_topics(&self) -> HashSet<String> {
        self.subscribers.lock().unwrap().keys().cloned().collect()
    }

    /// Deliver a message to subscribers without recording it as a publish
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        if let Some(senders) = self.subscribers.lock().unwrap().get(topic) {
            for sender in senders {
                let _ = sender.unbounded_send(BrokerMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, topic: &str, payload: Bytes, _timeout: Duration) -> Result<(), GatewayError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(GatewayError::Publish {
                topic: topic.to_string(),
                source: "broker unavailable".into(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));
        self.inject(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, GatewayError> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(rx))
    }
}

/// Handler recording every event it sees
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<(u32, InboundEvent)>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<(u32, InboundEvent)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, shard_id: u32, event: InboundEvent) {
        self.seen.lock().unwrap().push((shard_id, event));
    }
}

pub fn fleet(config: FleetConfig, source: Arc<MockSource>, factory: Arc<MockFactory>) -> Arc<ShardFleet> {
    Arc::new(ShardFleet::new(
        config,
        ShardTemplate::new("token".to_string(), Intents::GUILDS),
        Arc::new(GatewayMetadataCache::new(source)),
        factory,
        Arc::new(GatewayMetrics::detached()),
    ))
}

/// Poll `condition` until it holds, panicking after about two seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn command(op: u8, d: serde_json::Value) -> OutboundCommand {
    OutboundCommand::new(op, d)
}
