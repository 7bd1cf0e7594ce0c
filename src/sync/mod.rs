//! Conversation synchronization
//!
//! Keeps the signed-in user's conversations and message logs consistent
//! across REST fetches, local sends and realtime `message.sent` events.

mod engine;
mod log;
mod state;

use thiserror::Error;

use crate::models::ConversationId;

pub use engine::ConversationSyncEngine;

/// Failure of a sync operation. State is left unchanged when one is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("send response did not include the created message")]
    MissingMessage,

    #[error("backend request failed: {0:#}")]
    Backend(anyhow::Error),

    #[error("realtime subscription failed: {0:#}")]
    Realtime(anyhow::Error),
}

/// Change notification for front-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncUpdate {
    /// The conversation list was replaced.
    ConversationsLoaded,
    /// A conversation's preview or unread count changed.
    Conversation(ConversationId),
    /// A conversation's message log changed.
    Messages(ConversationId),
}
