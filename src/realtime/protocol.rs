//! Pusher protocol 7 frames
//!
//! Every frame is a JSON object `{"event": ..., "channel": ..., "data": ...}`.
//! Servers usually send `data` as a JSON-encoded string; some send an object.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";

/// Activity timeout used when the server does not announce one.
pub const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 120;

/// A decoded Pusher frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub channel: Option<String>,
    /// `data` with string-encoded JSON already unwrapped.
    pub data: Value,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Frame {
    /// Parse a websocket text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text).context("Invalid Pusher frame")?;
        let data = match raw.data {
            Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            other => other,
        };
        Ok(Self {
            event: raw.event,
            channel: raw.channel,
            data,
        })
    }

    /// True for `pusher:*` and `pusher_internal:*` protocol events.
    pub fn is_protocol(&self) -> bool {
        self.event.starts_with("pusher:") || self.event.starts_with("pusher_internal:")
    }
}

/// Payload of `pusher:connection_established`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout: u64,
}

fn default_activity_timeout() -> u64 {
    DEFAULT_ACTIVITY_TIMEOUT_SECS
}

/// Payload of `pusher:error`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorData {
    /// Codes 4000-4099 tell the client not to reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self.code, Some(4000..=4099))
    }
}

pub fn subscribe(channel: &str) -> String {
    serde_json::json!({ "event": "pusher:subscribe", "data": { "channel": channel } }).to_string()
}

pub fn unsubscribe(channel: &str) -> String {
    serde_json::json!({ "event": "pusher:unsubscribe", "data": { "channel": channel } })
        .to_string()
}

pub fn ping() -> String {
    serde_json::json!({ "event": PING, "data": {} }).to_string()
}

pub fn pong() -> String {
    serde_json::json!({ "event": PONG, "data": {} }).to_string()
}
