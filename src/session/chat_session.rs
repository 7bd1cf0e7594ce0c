//! Signed-in chat session
//!
//! Owns the realtime connection for as long as the session is open and
//! injects it into the sync engine.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::SessionStore;
use crate::api::client::ApiClient;
use crate::api::HttpChatBackend;
use crate::config::Config;
use crate::models::User;
use crate::realtime::{self, PusherConnection, RealtimeChannel};
use crate::sync::ConversationSyncEngine;

pub struct ChatSession {
    user: User,
    realtime: Arc<dyn RealtimeChannel>,
    engine: ConversationSyncEngine,
}

impl ChatSession {
    /// Open the stored session. With `live`, the realtime websocket is
    /// connected as well; otherwise subscriptions fail.
    pub async fn open(config: &Config, live: bool) -> Result<Self> {
        let stored = config
            .get_session()
            .context("Not signed in. Run 'ridechat signin' first.")?;

        let api_url = config.api_url();
        tracing::debug!("Opening session for user {} against {}", stored.user.id, api_url);
        let backend = HttpChatBackend::new(ApiClient::new(&api_url, stored.access_token)?);

        let realtime: Arc<dyn RealtimeChannel> = if live {
            let conn = PusherConnection::connect(&config.realtime)
                .await
                .context("Failed to connect to realtime server")?;
            tracing::info!("Realtime socket id {}", conn.socket_id());
            Arc::new(conn)
        } else {
            Arc::new(realtime::Offline)
        };

        let engine =
            ConversationSyncEngine::new(Arc::new(backend), Arc::clone(&realtime), stored.user.id);

        Ok(Self {
            user: stored.user,
            realtime,
            engine,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn engine(&self) -> &ConversationSyncEngine {
        &self.engine
    }

    /// Release every subscription and close the realtime connection.
    pub async fn close(self) {
        self.engine.shutdown().await;
        self.realtime.disconnect().await;
        tracing::debug!("Session for user {} closed", self.user.id);
    }
}
