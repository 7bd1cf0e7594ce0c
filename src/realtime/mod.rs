//! Real-time channel subscriptions over the Pusher websocket protocol
//!
//! The backend broadcasts `message.sent` on `conversation.{id}` channels.
//! `PusherConnection` owns the websocket in a background task; callers bind
//! channels and receive their events on an mpsc receiver.

pub mod connection;
pub mod protocol;
pub mod websocket;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::ConversationId;

pub use connection::PusherConnection;

/// Event name broadcast when a message is stored.
pub const MESSAGE_SENT: &str = "message.sent";

/// Channel name for a conversation.
pub fn conversation_channel(conversation_id: ConversationId) -> String {
    format!("conversation.{}", conversation_id)
}

/// An application event delivered on a bound channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub event: String,
    pub data: serde_json::Value,
}

/// Pub/sub transport consumed by the sync engine.
///
/// Delivery is at-most-once with no ordering guarantee; duplicates are possible.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Bind a channel. Events arrive on the returned receiver until the channel
    /// is unbound or the transport shuts down.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<ChannelEvent>>;

    /// Release a channel binding.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Close the transport and drop every binding.
    async fn disconnect(&self);
}

/// Transport for sessions opened without a realtime connection.
/// Every subscription fails.
pub struct Offline;

#[async_trait]
impl RealtimeChannel for Offline {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        anyhow::bail!("Cannot subscribe to {}: session opened without realtime", channel)
    }

    async fn unsubscribe(&self, _channel: &str) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {}
}
