//! Packet types exchanged with shards and the broker

use crate::error::GatewayError;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Gateway opcode for dispatched domain events
pub const DISPATCH_OPCODE: u8 = 0;

/// Raw gateway frame as received on a shard connection
#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    d: Value,
}

/// Event received from a shard's connection
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub op: u8,
    /// Event name, present for dispatches
    pub event: Option<String>,
    pub sequence: Option<u64>,
    /// Serialized `d` field of the frame
    pub payload: Bytes,
}

impl InboundEvent {
    /// Decode a JSON gateway frame
    pub fn from_frame(text: &str) -> Result<Self, GatewayError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| GatewayError::parse("gateway frame", e))?;
        let payload =
            serde_json::to_vec(&frame.d).map_err(|e| GatewayError::parse("gateway frame data", e))?;

        Ok(Self {
            op: frame.op,
            event: frame.t,
            sequence: frame.s,
            payload: Bytes::from(payload),
        })
    }

    pub fn dispatch(event: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            op: DISPATCH_OPCODE,
            event: Some(event.into()),
            sequence: None,
            payload: payload.into(),
        }
    }

    pub fn is_dispatch(&self) -> bool {
        self.op == DISPATCH_OPCODE
    }

    /// Event name if this is a dispatch
    pub fn dispatch_name(&self) -> Option<&str> {
        if self.is_dispatch() {
            self.event.as_deref()
        } else {
            None
        }
    }
}

/// Opcode-tagged command destined for exactly one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl OutboundCommand {
    pub fn new(op: u8, d: Value) -> Self {
        Self { op, d }
    }

    pub fn from_slice(payload: &[u8], context: impl Into<String>) -> Result<Self, GatewayError> {
        serde_json::from_slice(payload).map_err(|e| GatewayError::parse(context, e))
    }

    /// JSON text as written to the gateway connection
    pub fn to_json(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(|e| GatewayError::parse("outbound command", e))
    }

    pub fn to_bytes(&self) -> Result<Bytes, GatewayError> {
        self.to_json().map(Bytes::from)
    }
}

/// Payload of the fleet-wide `SEND` topic
///
/// The sender does not know which shard owns the guild, so the command is
/// addressed by routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendPacket {
    #[serde(
        deserialize_with = "deserialize_snowflake",
        serialize_with = "serialize_snowflake"
    )]
    pub guild_id: u64,
    pub packet: OutboundCommand,
}

impl SendPacket {
    pub fn from_slice(payload: &[u8]) -> Result<Self, GatewayError> {
        serde_json::from_slice(payload).map_err(|e| GatewayError::parse("SEND packet", e))
    }
}

/// A command whose destination shard has been resolved
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    pub shard_id: u32,
    pub command: OutboundCommand,
}

/// Snowflakes travel as decimal strings, but integer form is accepted too
fn deserialize_snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Snowflake {
        Int(u64),
        Str(String),
    }

    match Snowflake::deserialize(deserializer)? {
        Snowflake::Int(id) => Ok(id),
        Snowflake::Str(id) => id.parse().map_err(serde::de::Error::custom),
    }
}

fn serialize_snowflake<S>(id: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(id)
}
