//! Broker bridge tests
//!
//! Outbound forwarding and inbound command routing, including the single
//! re-publish hop between two fleet members sharing one broker.

mod common;

use bytes::Bytes;
use common::{command, eventually, fleet, MockBroker, MockFactory, MockSource};
use fleet_gateway::bridge::{BrokerBridge, Delivery, EventForwarder, Route};
use fleet_gateway::broker::Broker;
use fleet_gateway::config::FleetConfig;
use fleet_gateway::events::{InboundEvent, OutboundCommand};
use fleet_gateway::metrics::GatewayMetrics;
use fleet_gateway::shard::{EventHandler, ShardFleet, ShardState};
use fleet_gateway::GatewayError;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

const TIMEOUT: Duration = Duration::from_secs(1);

/// Guild whose destination shard is 1 of 4 (20971523 >> 22 == 5)
const GUILD_ON_SHARD_1: u64 = 20_971_523;
/// Guild whose destination shard is 2 of 4
const GUILD_ON_SHARD_2: u64 = 2 << 22;

struct Member {
    fleet: Arc<ShardFleet>,
    factory: Arc<MockFactory>,
    bridge: Arc<BrokerBridge>,
    run: JoinHandle<Result<(), GatewayError>>,
}

impl Member {
    async fn stop(self) {
        self.fleet.close_all().await;
        assert_ok!(self.run.await.unwrap());
    }
}

fn events(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Fleet member running every owned shard until closed
async fn member(server_index: u32, broker: Arc<MockBroker>) -> Member {
    let factory = MockFactory::holding();
    let fleet = fleet(
        FleetConfig::new(4, 2, server_index).unwrap(),
        MockSource::new(4),
        factory.clone(),
    );
    let bridge = BrokerBridge::new(
        Arc::clone(&fleet),
        broker as Arc<dyn Broker>,
        events(&["MESSAGE_CREATE"]),
        TIMEOUT,
        Arc::new(GatewayMetrics::detached()),
    );

    let run = tokio::spawn({
        let fleet = Arc::clone(&fleet);
        async move { fleet.start().await }
    });

    let owned = fleet.local_shard_ids().unwrap();
    eventually("owned shards registered", || owned.iter().all(|id| fleet.is_local(*id))).await;

    Member {
        fleet,
        factory,
        bridge,
        run,
    }
}

fn send_packet(guild_id: u64, cmd: &OutboundCommand) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "guild_id": guild_id.to_string(),
        "packet": cmd,
    }))
    .unwrap()
}

#[tokio::test]
async fn send_for_local_shard_is_delivered_once() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;
    let cmd = command(8, json!({"guild_id": GUILD_ON_SHARD_2.to_string(), "limit": 0}));

    let delivery = assert_ok!(
        member
            .bridge
            .handle_message("SEND", &send_packet(GUILD_ON_SHARD_2, &cmd))
            .await
    );

    assert_eq!(delivery, Delivery::Local { shard_id: 2 });
    assert_eq!(member.factory.shard(2).unwrap().sent(), vec![cmd]);
    assert!(member.factory.shard(0).unwrap().sent().is_empty());
    assert!(broker.published().is_empty());

    member.stop().await;
}

#[tokio::test]
async fn send_for_remote_shard_republishes_command_only() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;
    let cmd = command(4, json!({"channel_id": null, "self_mute": false}));

    let delivery = assert_ok!(
        member
            .bridge
            .handle_message("SEND", &send_packet(GUILD_ON_SHARD_1, &cmd))
            .await
    );

    assert_eq!(delivery, Delivery::Republished { shard_id: 1 });
    assert_eq!(member.factory.total_sent(), 0);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(topic, "1");

    let body: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(body, json!({"op": 4, "d": {"channel_id": null, "self_mute": false}}));
    assert!(body.get("guild_id").is_none());

    member.stop().await;
}

#[tokio::test]
async fn unparsable_send_is_dropped() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;

    let err = assert_err!(member.bridge.handle_message("SEND", b"{not json").await);
    assert!(matches!(err, GatewayError::Parse { .. }));
    assert!(err.is_routing_miss());

    let err = assert_err!(
        member
            .bridge
            .handle_message("SEND", br#"{"guild_id":"x","packet":{"op":8}}"#)
            .await
    );
    assert!(matches!(err, GatewayError::Parse { .. }));

    assert_eq!(member.factory.total_sent(), 0);
    assert!(broker.published().is_empty());

    member.stop().await;
}

#[tokio::test]
async fn shard_topic_delivers_to_local_shard() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;
    let cmd = command(3, json!({"status": "idle"}));

    let delivery = assert_ok!(
        member
            .bridge
            .handle_message("0", &serde_json::to_vec(&cmd).unwrap())
            .await
    );

    assert_eq!(delivery, Delivery::Local { shard_id: 0 });
    assert_eq!(member.factory.shard(0).unwrap().sent(), vec![cmd]);

    member.stop().await;
}

#[tokio::test]
async fn shard_topic_misses_are_dropped() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;
    let valid = serde_json::to_vec(&command(1, Value::Null)).unwrap();

    let err = assert_err!(member.bridge.handle_message("1", &valid).await);
    assert!(matches!(err, GatewayError::ShardNotFound { shard_id: 1 }));

    let err = assert_err!(member.bridge.handle_message("guild-events", &valid).await);
    assert!(matches!(err, GatewayError::UnknownTopic { .. }));

    let err = assert_err!(member.bridge.handle_message("2", b"[]").await);
    assert!(matches!(err, GatewayError::Parse { .. }));

    assert_eq!(member.factory.total_sent(), 0);
    assert!(broker.published().is_empty());

    member.stop().await;
}

#[tokio::test]
async fn resolve_is_side_effect_free() {
    let broker = MockBroker::new();
    let member = member(1, broker.clone()).await;
    let cmd = command(8, json!({}));

    let route = assert_ok!(member.bridge.resolve("SEND", &send_packet(GUILD_ON_SHARD_1, &cmd)));
    assert!(matches!(route, Route::Local(ref routed) if routed.shard_id == 1 && routed.command == cmd));

    let route = assert_ok!(member.bridge.resolve("SEND", &send_packet(GUILD_ON_SHARD_2, &cmd)));
    assert!(matches!(route, Route::Remote(ref routed) if routed.shard_id == 2));

    assert_eq!(member.factory.total_sent(), 0);
    assert!(broker.published().is_empty());

    member.stop().await;
}

#[tokio::test]
async fn connect_subscribes_send_and_owned_shard_topics() {
    let broker = MockBroker::new();
    let member = member(1, broker.clone()).await;

    let subscriptions = assert_ok!(member.bridge.connect().await);
    assert_eq!(subscriptions.len(), 3);

    let expected: HashSet<String> = events(&["SEND", "1", "3"]);
    eventually("subscriptions", || broker.subscribed_topics() == expected).await;

    // Garbage does not end the listening task
    broker.inject("SEND", Bytes::from_static(b"garbage"));
    let cmd = command(8, json!({"limit": 0}));
    broker.inject("SEND", send_packet(GUILD_ON_SHARD_1, &cmd));

    let shard = member.factory.shard(1).unwrap();
    eventually("delivery via SEND", || shard.sent().len() == 1).await;
    assert_eq!(shard.sent(), vec![cmd]);
    assert!(subscriptions.iter().all(|handle| !handle.is_finished()));

    for handle in subscriptions {
        handle.abort();
    }
    member.stop().await;
}

#[tokio::test]
async fn republished_command_reaches_remote_owner_in_one_hop() {
    let broker = MockBroker::new();
    let first = member(0, broker.clone()).await;
    let second = member(1, broker.clone()).await;

    let first_subs = assert_ok!(first.bridge.connect().await);
    let second_subs = assert_ok!(second.bridge.connect().await);
    eventually("both members subscribed", || {
        ["SEND", "0", "1", "2", "3"]
            .iter()
            .all(|t| broker.subscribed_topics().contains(*t))
    })
    .await;

    // Received by member 0, owned by member 1
    let cmd = command(8, json!({"query": "", "limit": 0}));
    let delivery = assert_ok!(
        first
            .bridge
            .handle_message("SEND", &send_packet(GUILD_ON_SHARD_1, &cmd))
            .await
    );
    assert_eq!(delivery, Delivery::Republished { shard_id: 1 });

    let shard = second.factory.shard(1).unwrap();
    eventually("remote delivery", || shard.sent().len() == 1).await;
    assert_eq!(shard.sent(), vec![cmd]);
    assert_eq!(first.factory.total_sent(), 0);
    assert_eq!(broker.published().len(), 1);

    for handle in first_subs.into_iter().chain(second_subs) {
        handle.abort();
    }
    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn connect_installs_forwarder_for_allow_listed_events() {
    let broker = MockBroker::new();
    let factory = Arc::new(MockFactory {
        script: vec![
            InboundEvent::dispatch("MESSAGE_CREATE", r#"{"content":"gm"}"#),
            InboundEvent::dispatch("TYPING_START", "{}"),
        ],
        ..Default::default()
    });
    let fleet = fleet(FleetConfig::standalone(1), MockSource::new(1), factory);
    let bridge = BrokerBridge::new(
        Arc::clone(&fleet),
        broker.clone() as Arc<dyn Broker>,
        events(&["MESSAGE_CREATE"]),
        TIMEOUT,
        Arc::new(GatewayMetrics::detached()),
    );

    let subscriptions = assert_ok!(bridge.connect().await);
    assert_ok!(fleet.start().await);

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "MESSAGE_CREATE");
    assert_eq!(published[0].1, Bytes::from_static(br#"{"content":"gm"}"#));
    assert_eq!(fleet.state().total_events_forwarded(), 1);

    for handle in subscriptions {
        handle.abort();
    }
}

#[tokio::test]
async fn connect_requires_resolved_shard_count() {
    let fleet = fleet(FleetConfig::standalone(0), MockSource::new(2), Arc::new(MockFactory::default()));
    let bridge = BrokerBridge::new(
        fleet,
        MockBroker::new() as Arc<dyn Broker>,
        HashSet::new(),
        TIMEOUT,
        Arc::new(GatewayMetrics::detached()),
    );

    let err = assert_err!(bridge.connect().await);
    assert!(matches!(err, GatewayError::ShardCountUnresolved));
}

#[tokio::test]
async fn send_is_dropped_when_metadata_recommends_zero_shards() {
    let broker = MockBroker::new();
    let fleet = fleet(FleetConfig::standalone(0), MockSource::new(0), Arc::new(MockFactory::default()));
    let bridge = BrokerBridge::new(
        Arc::clone(&fleet),
        broker.clone() as Arc<dyn Broker>,
        HashSet::new(),
        TIMEOUT,
        Arc::new(GatewayMetrics::detached()),
    );

    assert_err!(fleet.resolve_shard_count().await);
    let err = assert_err!(bridge.connect().await);
    assert!(matches!(err, GatewayError::ShardCountUnresolved));

    let cmd = command(8, json!({"limit": 0}));
    let err = assert_err!(bridge.handle_message("SEND", &send_packet(GUILD_ON_SHARD_1, &cmd)).await);
    assert!(matches!(err, GatewayError::ShardCountUnresolved));
    assert!(broker.published().is_empty());
}

fn forwarder(broker: Arc<MockBroker>, names: &[&str]) -> EventForwarder {
    EventForwarder::new(
        broker,
        events(names),
        TIMEOUT,
        ShardState::new(0),
        Arc::new(GatewayMetrics::detached()),
    )
}

#[tokio::test]
async fn forwarder_publishes_only_allow_listed_dispatches() {
    let broker = MockBroker::new();
    let forwarder = forwarder(broker.clone(), &["GUILD_MEMBER_ADD"]);

    forwarder
        .handle(0, InboundEvent::dispatch("GUILD_CREATE", "{}"))
        .await;
    assert!(broker.published().is_empty());

    // Heartbeat ACK carrying a name is still not a dispatch
    let control = InboundEvent {
        op: 11,
        event: Some("GUILD_MEMBER_ADD".to_string()),
        sequence: None,
        payload: Bytes::new(),
    };
    assert!(!forwarder.forwards(&control));
    forwarder.handle(0, control).await;
    assert!(broker.published().is_empty());

    forwarder
        .handle(3, InboundEvent::dispatch("GUILD_MEMBER_ADD", r#"{"user":{"id":"1"}}"#))
        .await;
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "GUILD_MEMBER_ADD");
    assert_eq!(published[0].1, Bytes::from_static(br#"{"user":{"id":"1"}}"#));
}

#[tokio::test]
async fn forwarder_swallows_publish_failures() {
    let broker = MockBroker::new();
    broker.fail_publish.store(true, Ordering::SeqCst);
    let forwarder = forwarder(broker.clone(), &["MESSAGE_CREATE"]);

    forwarder
        .handle(0, InboundEvent::dispatch("MESSAGE_CREATE", "{}"))
        .await;
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn republish_failure_is_reported_not_retried() {
    let broker = MockBroker::new();
    let member = member(0, broker.clone()).await;
    broker.fail_publish.store(true, Ordering::SeqCst);

    let err = assert_err!(
        member
            .bridge
            .handle_message("SEND", &send_packet(GUILD_ON_SHARD_1, &command(8, json!({}))))
            .await
    );
    assert!(matches!(err, GatewayError::Publish { ref topic, .. } if topic == "1"));
    assert!(!err.is_routing_miss());
    assert!(broker.published().is_empty());

    member.stop().await;
}
