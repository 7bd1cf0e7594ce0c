//! Per-conversation message log
//!
//! Messages from every source (history fetch, send response, realtime event)
//! are merged by id and kept sorted by `(created_at, id)`.

use std::collections::HashSet;

use crate::models::{Message, MessageId, UserId};

#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageLog {
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Insert or refresh a message. Returns true if the id was not held yet.
    ///
    /// A refreshed entry takes the incoming fields, except `read` which never
    /// goes back to false.
    pub fn insert(&mut self, mut msg: Message) -> bool {
        let is_new = self.ids.insert(msg.id);
        if !is_new {
            if let Some(pos) = self.messages.iter().position(|m| m.id == msg.id) {
                let old = self.messages.remove(pos);
                msg.read |= old.read;
            }
        }

        let key = msg.order_key();
        let pos = self.messages.partition_point(|m| m.order_key() < key);
        self.messages.insert(pos, msg);
        is_new
    }

    /// Merge a fetched snapshot. Returns how many messages were new.
    pub fn merge(&mut self, snapshot: Vec<Message>) -> usize {
        snapshot
            .into_iter()
            .map(|m| self.insert(m))
            .filter(|is_new| *is_new)
            .count()
    }

    /// Set `read` on every held message. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for msg in self.messages.iter_mut().filter(|m| !m.read) {
            msg.read = true;
            changed += 1;
        }
        changed
    }

    /// Unread messages not written by `me`.
    pub fn unread_from_others(&self, me: UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.read && m.sender_id != me)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn base() -> DateTime<Utc> {
        "2025-03-01T10:00:00Z".parse().unwrap()
    }

    fn msg(id: MessageId, offset_secs: i64, sender: UserId) -> Message {
        Message {
            id,
            conversation_id: 42,
            sender_id: sender,
            content: format!("m{}", id),
            created_at: base() + Duration::seconds(offset_secs),
            read: false,
        }
    }

    fn ids(log: &MessageLog) -> Vec<MessageId> {
        log.as_slice().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_out_of_order_inserts_sorted() {
        let mut log = MessageLog::default();
        assert!(log.insert(msg(3, 30, 9)));
        assert!(log.insert(msg(1, 10, 9)));
        assert!(log.insert(msg(2, 20, 7)));
        assert_eq!(ids(&log), vec![1, 2, 3]);
    }

    #[test]
    fn test_same_timestamp_ordered_by_id() {
        let mut log = MessageLog::default();
        log.insert(msg(9, 0, 1));
        log.insert(msg(4, 0, 1));
        assert_eq!(ids(&log), vec![4, 9]);
    }

    #[test]
    fn test_duplicate_not_appended() {
        let mut log = MessageLog::default();
        assert!(log.insert(msg(1, 0, 9)));
        assert!(!log.insert(msg(1, 0, 9)));
        assert!(!log.insert(msg(1, 0, 9)));
        assert_eq!(log.as_slice().len(), 1);
        assert!(log.contains(1));
    }

    #[test]
    fn test_refresh_keeps_read() {
        let mut log = MessageLog::default();
        let mut first = msg(1, 0, 9);
        first.read = true;
        log.insert(first);

        let mut edited = msg(1, 0, 9);
        edited.content = "edited".into();
        assert!(!log.insert(edited));

        assert_eq!(log.as_slice()[0].content, "edited");
        assert!(log.as_slice()[0].read);
    }

    #[test]
    fn test_merge_keeps_entries_missing_from_snapshot() {
        let mut log = MessageLog::default();
        log.insert(msg(5, 50, 9));

        let added = log.merge(vec![msg(1, 10, 9), msg(2, 20, 7), msg(1, 10, 9)]);
        assert_eq!(added, 2);
        assert_eq!(ids(&log), vec![1, 2, 5]);
    }

    #[test]
    fn test_mark_all_read() {
        let mut log = MessageLog::default();
        log.merge(vec![msg(1, 0, 9), msg(2, 1, 7), msg(3, 2, 9)]);
        assert_eq!(log.unread_from_others(7), 2);

        assert_eq!(log.mark_all_read(), 3);
        assert_eq!(log.unread_from_others(7), 0);
        assert!(log.as_slice().iter().all(|m| m.read));
        assert_eq!(log.mark_all_read(), 0);
    }
}
