//! REST client for the ride-sharing chat backend

mod chat;
pub mod client;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Conversation, ConversationId, Message};

pub use chat::HttpChatBackend;

/// Chat endpoints consumed by the sync engine.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /conversations`
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// `GET /messages/{conversation_id}`. Unrecognizable bodies yield an empty list.
    async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    /// `POST /messages`. Returns `None` when the response carries no message.
    async fn post_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Option<Message>>;

    /// `POST /messages/{conversation_id}/mark-as-read`
    async fn mark_read(&self, conversation_id: ConversationId) -> Result<()>;
}
