//! Conversation sync engine
//!
//! State lives behind a mutex that is never held across an `.await`: each
//! operation calls the backend first, then locks once to apply the result.
//! Realtime events are applied by one task per subscribed conversation.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::state::{Inbound, SyncState};
use super::{SyncError, SyncUpdate};
use crate::api::ChatBackend;
use crate::models::{Conversation, ConversationId, Message, UserId};
use crate::realtime::{self, ChannelEvent, RealtimeChannel};

const UPDATE_CAPACITY: usize = 64;

/// Payload of `message.sent`.
#[derive(Deserialize)]
struct MessageSent {
    #[serde(default)]
    message: Option<Message>,
}

/// One live subscription. `task` is unset while the transport call is in
/// flight.
struct Subscription {
    token: u64,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    realtime: Arc<dyn RealtimeChannel>,
    current_user: UserId,
    state: Mutex<SyncState>,
    subscriptions: Mutex<HashMap<ConversationId, Subscription>>,
    next_token: AtomicU64,
    updates: broadcast::Sender<SyncUpdate>,
}

impl Inner {
    /// Lock state, recovering from a poisoned mutex.
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<ConversationId, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the subscription entry if it still belongs to `token`.
    fn release(&self, conversation_id: ConversationId, token: u64) -> bool {
        let mut subs = self.subscriptions();
        if subs.get(&conversation_id).is_some_and(|s| s.token == token) {
            subs.remove(&conversation_id);
            return true;
        }
        false
    }

    fn notify(&self, update: SyncUpdate) {
        // No receivers is fine.
        let _ = self.updates.send(update);
    }

    fn apply_event(&self, conversation_id: ConversationId, event: ChannelEvent) {
        if event.event != realtime::MESSAGE_SENT {
            tracing::debug!(
                "Ignoring {} on conversation {}",
                event.event,
                conversation_id
            );
            return;
        }

        let msg = match serde_json::from_value::<MessageSent>(event.data) {
            Ok(MessageSent { message: Some(msg) }) => msg,
            Ok(MessageSent { message: None }) => {
                tracing::debug!("message.sent without message on {}", conversation_id);
                return;
            }
            Err(e) => {
                tracing::warn!("Malformed message.sent on {}: {}", conversation_id, e);
                return;
            }
        };

        if msg.conversation_id != conversation_id {
            tracing::warn!(
                "message {} belongs to conversation {}, not {}; skipped",
                msg.id,
                msg.conversation_id,
                conversation_id
            );
            return;
        }

        let msg_id = msg.id;
        let outcome = self
            .state()
            .apply_inbound(conversation_id, msg, self.current_user);
        match outcome {
            Inbound::Duplicate => {
                tracing::debug!("Duplicate message {} on {}", msg_id, conversation_id);
            }
            Inbound::Appended { counted } => {
                tracing::debug!(
                    "Message {} on {} (unread incremented: {})",
                    msg_id,
                    conversation_id,
                    counted
                );
                self.notify(SyncUpdate::Messages(conversation_id));
                self.notify(SyncUpdate::Conversation(conversation_id));
            }
        }
    }
}

/// Owns conversations and message logs for one signed-in user.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationSyncEngine {
    inner: Arc<Inner>,
}

impl ConversationSyncEngine {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        realtime: Arc<dyn RealtimeChannel>,
        current_user: UserId,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                realtime,
                current_user,
                state: Mutex::new(SyncState::default()),
                subscriptions: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
                updates,
            }),
        }
    }

    pub fn current_user(&self) -> UserId {
        self.inner.current_user
    }

    /// Subscribe to change notifications.
    pub fn updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inner.updates.subscribe()
    }

    // -- Reads --

    /// Conversations in backend order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.state().conversations().to_vec()
    }

    pub fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.inner.state().conversation(conversation_id).cloned()
    }

    /// Held messages, oldest first. Empty if never loaded.
    pub fn get_messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        self.inner.state().messages(conversation_id).to_vec()
    }

    pub fn total_unread(&self) -> u64 {
        self.inner.state().total_unread()
    }

    /// Unread held messages from other participants.
    pub fn held_unread(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .state()
            .log(conversation_id)
            .map_or(0, |log| log.unread_from_others(self.inner.current_user))
    }

    // -- Operations --

    /// Fetch the conversation list and replace local membership.
    pub async fn load_conversations(&self) -> Result<usize, SyncError> {
        let issued_at = self.inner.state().stamp();

        let fresh = self
            .inner
            .backend
            .list_conversations()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to load conversations: {:#}", e);
                SyncError::Backend(e)
            })?;

        let count = fresh.len();
        self.inner.state().replace_conversations(fresh, issued_at);
        tracing::debug!("Loaded {} conversations", count);
        self.inner.notify(SyncUpdate::ConversationsLoaded);
        Ok(count)
    }

    /// Fetch history and merge it into the conversation's log.
    ///
    /// Returns how many messages were not held before.
    pub async fn load_messages(&self, conversation_id: ConversationId) -> Result<usize, SyncError> {
        let snapshot = self
            .inner
            .backend
            .list_messages(conversation_id)
            .await
            .map_err(|e| {
                tracing::warn!(
                    "Failed to load messages for conversation {}: {:#}",
                    conversation_id,
                    e
                );
                SyncError::Backend(e)
            })?;

        let added = self
            .inner
            .state()
            .merge_messages(conversation_id, snapshot);
        tracing::debug!(
            "Merged history for conversation {} ({} new)",
            conversation_id,
            added
        );
        if added > 0 {
            self.inner.notify(SyncUpdate::Messages(conversation_id));
        }
        Ok(added)
    }

    /// Send a message. Nothing is shown until the backend accepts it.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<Message, SyncError> {
        if content.trim().is_empty() {
            return Err(SyncError::EmptyContent);
        }

        let sent = self
            .inner
            .backend
            .post_message(conversation_id, content)
            .await
            .map_err(|e| {
                tracing::warn!(
                    "Failed to send message to conversation {}: {:#}",
                    conversation_id,
                    e
                );
                SyncError::Backend(e)
            })?;

        let Some(msg) = sent else {
            tracing::warn!(
                "Send to conversation {} returned no message",
                conversation_id
            );
            return Err(SyncError::MissingMessage);
        };

        self.inner.state().apply_sent(conversation_id, msg.clone());
        self.inner.notify(SyncUpdate::Messages(conversation_id));
        self.inner.notify(SyncUpdate::Conversation(conversation_id));
        Ok(msg)
    }

    /// Mark a conversation read. Local state changes only if the backend
    /// accepted the request.
    pub async fn mark_as_read(&self, conversation_id: ConversationId) -> Result<(), SyncError> {
        self.inner
            .backend
            .mark_read(conversation_id)
            .await
            .map_err(|e| {
                tracing::warn!(
                    "Failed to mark conversation {} read: {:#}",
                    conversation_id,
                    e
                );
                SyncError::Backend(e)
            })?;

        self.inner.state().mark_read(conversation_id);
        self.inner.notify(SyncUpdate::Messages(conversation_id));
        self.inner.notify(SyncUpdate::Conversation(conversation_id));
        Ok(())
    }

    /// Start applying realtime events for a conversation. No-op if already
    /// subscribed or a subscription is in flight.
    ///
    /// When the transport closes the event stream (fatal server error,
    /// disconnect) the conversation drops back to unsubscribed and can be
    /// subscribed again.
    pub async fn subscribe_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut subs = self.inner.subscriptions();
            if subs.contains_key(&conversation_id) {
                return Ok(());
            }
            subs.insert(conversation_id, Subscription { token, task: None });
        }

        let channel = realtime::conversation_channel(conversation_id);
        let mut events = match self.inner.realtime.subscribe(&channel).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Failed to subscribe to {}: {:#}", channel, e);
                self.inner.release(conversation_id, token);
                return Err(SyncError::Realtime(e));
            }
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                inner.apply_event(conversation_id, event);
            }
            if inner.release(conversation_id, token) {
                tracing::info!(
                    "Event stream for conversation {} closed by transport",
                    conversation_id
                );
            }
        });

        match self.inner.subscriptions().get_mut(&conversation_id) {
            Some(sub) if sub.token == token => sub.task = Some(handle),
            _ => {
                // Unsubscribed while the transport call was in flight.
                handle.abort();
                return Ok(());
            }
        }
        tracing::info!("Subscribed to {}", channel);
        Ok(())
    }

    /// Subscribe, fetch history and mark it read, in that order.
    ///
    /// Events delivered while the fetch is in flight merge with the snapshot.
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<usize, SyncError> {
        self.subscribe_conversation(conversation_id).await?;
        let added = self.load_messages(conversation_id).await?;
        self.mark_as_read(conversation_id).await?;
        Ok(added)
    }

    pub fn is_subscribed(&self, conversation_id: ConversationId) -> bool {
        self.inner.subscriptions().contains_key(&conversation_id)
    }

    /// Stop applying realtime events for a conversation and release the channel.
    pub async fn unsubscribe_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), SyncError> {
        let Some(sub) = self.inner.subscriptions().remove(&conversation_id) else {
            return Ok(());
        };
        if let Some(task) = sub.task {
            task.abort();
        }

        let channel = realtime::conversation_channel(conversation_id);
        self.inner
            .realtime
            .unsubscribe(&channel)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to unsubscribe from {}: {:#}", channel, e);
                SyncError::Realtime(e)
            })
    }

    /// Release every subscription. The realtime transport itself belongs to
    /// the session and is closed there.
    pub async fn shutdown(&self) {
        let ids: Vec<ConversationId> = self.inner.subscriptions().keys().copied().collect();
        for id in ids {
            // Failures are already logged.
            let _ = self.unsubscribe_conversation(id).await;
        }
    }
}
