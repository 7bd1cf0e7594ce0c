//! In-memory conversation state
//!
//! Conversation list membership comes from the backend. Every local
//! incremental update stamps the conversation with a monotonic counter so a
//! list fetch issued before that update cannot roll back its `last_message`
//! and `unread_count`.

use std::collections::HashMap;

use super::log::MessageLog;
use crate::models::{Conversation, ConversationId, Message, UserId};

/// Result of applying a realtime message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Already held; nothing changed.
    Duplicate,
    /// Appended to the log. `counted` is true if unread was incremented.
    Appended { counted: bool },
}

#[derive(Debug, Default)]
pub struct SyncState {
    /// Backend order
    conversations: Vec<Conversation>,
    logs: HashMap<ConversationId, MessageLog>,
    touched: HashMap<ConversationId, u64>,
    stamp: u64,
}

impl SyncState {
    /// Current mutation stamp. Captured before a list fetch is issued.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    fn touch(&mut self, conversation_id: ConversationId) {
        self.stamp += 1;
        self.touched.insert(conversation_id, self.stamp);
    }

    fn conversation_mut(&mut self, conversation_id: ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.logs
            .get(&conversation_id)
            .map(MessageLog::as_slice)
            .unwrap_or(&[])
    }

    pub fn log(&self, conversation_id: ConversationId) -> Option<&MessageLog> {
        self.logs.get(&conversation_id)
    }

    pub fn total_unread(&self) -> u64 {
        self.conversations
            .iter()
            .map(|c| u64::from(c.unread_count))
            .sum()
    }

    /// Replace the list with a fetched snapshot.
    ///
    /// `issued_at` is the stamp taken when the fetch started. Conversations
    /// updated locally since then keep their local preview and unread count.
    pub fn replace_conversations(&mut self, fresh: Vec<Conversation>, issued_at: u64) {
        let mut fresh = fresh;
        for conv in fresh.iter_mut() {
            let newer_local = self
                .touched
                .get(&conv.conversation_id)
                .is_some_and(|stamp| *stamp > issued_at);
            if !newer_local {
                continue;
            }
            if let Some(local) = self.conversation(conv.conversation_id) {
                tracing::debug!(
                    "Keeping local state for conversation {} over stale list",
                    conv.conversation_id
                );
                conv.last_message = local.last_message.clone();
                conv.unread_count = local.unread_count;
            }
        }
        self.conversations = fresh;
    }

    /// Merge a fetched history snapshot. Returns how many messages were new.
    pub fn merge_messages(
        &mut self,
        conversation_id: ConversationId,
        snapshot: Vec<Message>,
    ) -> usize {
        self.logs.entry(conversation_id).or_default().merge(snapshot)
    }

    /// Apply a message the current user just sent.
    pub fn apply_sent(&mut self, conversation_id: ConversationId, msg: Message) {
        let content = msg.content.clone();
        self.logs.entry(conversation_id).or_default().insert(msg);
        self.touch(conversation_id);
        if let Some(conv) = self.conversation_mut(conversation_id) {
            conv.last_message = Some(content);
            conv.unread_count = 0;
        }
    }

    /// Apply a realtime `message.sent`. Duplicates leave everything untouched.
    pub fn apply_inbound(
        &mut self,
        conversation_id: ConversationId,
        msg: Message,
        me: UserId,
    ) -> Inbound {
        let log = self.logs.entry(conversation_id).or_default();
        if log.contains(msg.id) {
            return Inbound::Duplicate;
        }

        let id = msg.id;
        let content = msg.content.clone();
        let from_other = msg.sender_id != me;
        log.insert(msg);
        // A late delivery of an older message must not replace the preview.
        let is_latest = log.as_slice().last().is_some_and(|m| m.id == id);
        self.touch(conversation_id);

        let mut counted = false;
        if let Some(conv) = self.conversation_mut(conversation_id) {
            if is_latest {
                conv.last_message = Some(content);
            }
            if from_other {
                conv.unread_count += 1;
                counted = true;
            }
        }
        Inbound::Appended { counted }
    }

    /// Mark every held message read and zero the unread count.
    pub fn mark_read(&mut self, conversation_id: ConversationId) {
        if let Some(log) = self.logs.get_mut(&conversation_id) {
            log.mark_all_read();
        }
        self.touch(conversation_id);
        if let Some(conv) = self.conversation_mut(conversation_id) {
            conv.unread_count = 0;
        }
    }
}
