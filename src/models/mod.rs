//! Data models for the ride-sharing chat backend

mod conversation;
mod message;
mod user;

pub use conversation::*;
pub use message::*;
pub use user::*;

/// Backend identifier for a conversation.
pub type ConversationId = u64;

/// Backend identifier for a message.
pub type MessageId = u64;

/// Backend identifier for a user.
pub type UserId = u64;
