//! Conversation and message endpoints
//!
//! The backend wraps payloads in a `{ "data": ... }` envelope, but older
//! routes return bare arrays and the send route may answer with
//! `{ "message": ... }`. Parsing is lenient: unknown shapes become empty
//! results and malformed entries are skipped.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::client::ApiClient;
use super::ChatBackend;
use crate::models::{Conversation, ConversationId, Message};

/// `ChatBackend` over the HTTP API.
pub struct HttpChatBackend {
    client: ApiClient,
}

impl HttpChatBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let body = self.client.get_json("/conversations").await?;
        Ok(parse_list(body, "conversation"))
    }

    async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let path = format!("/messages/{}", conversation_id);
        let body = self.client.get_json(&path).await?;
        Ok(parse_list(body, "message"))
    }

    async fn post_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Option<Message>> {
        let body = serde_json::json!({
            "conversation_id": conversation_id,
            "content": content,
        });
        let resp = self.client.post_json("/messages", &body).await?;
        Ok(parse_sent_message(resp))
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        let path = format!("/messages/{}/mark-as-read", conversation_id);
        // Response body is not part of the contract.
        self.client.post(&path, None).await?;
        Ok(())
    }
}

/// Extract a list from `{ "data": [...] }` or a bare array.
fn parse_list<T: DeserializeOwned>(body: Value, what: &str) -> Vec<T> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => {
                tracing::warn!("Unexpected {} list response shape, treating as empty", what);
                return Vec::new();
            }
        },
        _ => {
            tracing::warn!("Unexpected {} list response shape, treating as empty", what);
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}

/// Extract the created message from `{ "data": {...} }` or `{ "message": {...} }`.
fn parse_sent_message(body: Value) -> Option<Message> {
    let Value::Object(mut map) = body else {
        return None;
    };
    ["data", "message"]
        .iter()
        .filter_map(|key| map.remove(*key))
        .find_map(|v| serde_json::from_value(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg_json(id: u64) -> Value {
        json!({
            "id": id,
            "conversation_id": 42,
            "sender_id": 7,
            "content": "Hello",
            "created_at": "2025-03-01T10:00:00.000000Z",
            "read": false
        })
    }

    #[test]
    fn test_data_envelope() {
        let msgs: Vec<Message> =
            parse_list(json!({ "data": [msg_json(1), msg_json(2)] }), "message");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].id, 2);
    }

    #[test]
    fn test_bare_array() {
        let msgs: Vec<Message> = parse_list(json!([msg_json(3)]), "message");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_unrecognized_shape_is_empty() {
        let msgs: Vec<Message> = parse_list(json!({ "data": { "oops": true } }), "message");
        assert!(msgs.is_empty());
        let msgs: Vec<Message> = parse_list(json!("nope"), "message");
        assert!(msgs.is_empty());
        let msgs: Vec<Message> = parse_list(json!({ "error": "x" }), "message");
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let msgs: Vec<Message> =
            parse_list(json!({ "data": [msg_json(1), { "id": "bad" }] }), "message");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_sent_message_data_or_message() {
        assert_eq!(parse_sent_message(json!({ "data": msg_json(5) })).unwrap().id, 5);
        assert_eq!(parse_sent_message(json!({ "message": msg_json(6) })).unwrap().id, 6);
        assert!(parse_sent_message(json!({ "status": "ok" })).is_none());
        assert!(parse_sent_message(json!([])).is_none());
    }

    #[test]
    fn test_sent_message_falls_back_when_data_is_not_a_message() {
        let body = json!({ "data": null, "message": msg_json(8) });
        assert_eq!(parse_sent_message(body).unwrap().id, 8);
    }
}
