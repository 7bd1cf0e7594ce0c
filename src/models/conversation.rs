//! Conversation-related models

use serde::{Deserialize, Serialize};

use super::ConversationId;

/// Conversation entry as returned by `GET /conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub other_user_name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// Preview line for list display.
    pub fn preview(&self) -> &str {
        match self.last_message.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => "(no messages yet)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_optional_fields() {
        let conv: Conversation = serde_json::from_str(r#"{"conversation_id": 42}"#).unwrap();
        assert_eq!(conv.conversation_id, 42);
        assert_eq!(conv.unread_count, 0);
        assert!(conv.last_message.is_none());
        assert_eq!(conv.preview(), "(no messages yet)");
    }

    #[test]
    fn test_null_last_message() {
        let conv: Conversation = serde_json::from_str(
            r#"{"conversation_id": 3, "other_user_name": "Ana", "last_message": null, "unread_count": 2}"#,
        )
        .unwrap();
        assert_eq!(conv.other_user_name, "Ana");
        assert_eq!(conv.unread_count, 2);
        assert!(conv.last_message.is_none());
    }
}
