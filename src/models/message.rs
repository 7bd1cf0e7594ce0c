//! Message-related models

use chrono::{DateTime, Utc};
use serde::de;
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, UserId};

/// Accept `true`/`false` as well as the `0`/`1` integers some backends emit for
/// boolean columns.
fn bool_or_int<'de, D: de::Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = bool;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("bool or 0/1")
        }
        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<bool, E> {
            Ok(v)
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<bool, E> {
            Ok(v != 0)
        }
        fn visit_unit<E: de::Error>(self) -> std::result::Result<bool, E> {
            Ok(false)
        }
    }
    d.deserialize_any(Visitor)
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub read: bool,
}

impl Message {
    /// Sort key for a conversation log: creation time, ties broken by id.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_as_integer() {
        let msg: Message = serde_json::from_str(
            r#"{"id":1,"conversation_id":42,"sender_id":9,"content":"oi","created_at":"2025-03-01T10:00:00.000000Z","read":1}"#,
        )
        .unwrap();
        assert!(msg.read);
        assert_eq!(msg.sender_id, 9);
    }

    #[test]
    fn test_read_missing_defaults_false() {
        let msg: Message = serde_json::from_str(
            r#"{"id":1,"conversation_id":42,"sender_id":9,"content":"oi","created_at":"2025-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(!msg.read);
    }

    #[test]
    fn test_order_key_breaks_ties_by_id() {
        let at = "2025-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let a = Message {
            id: 5,
            conversation_id: 1,
            sender_id: 1,
            content: "a".into(),
            created_at: at,
            read: false,
        };
        let b = Message { id: 4, ..a.clone() };
        assert!(b.order_key() < a.order_key());
    }
}
