//! Stored session and storage trait

use serde::{Deserialize, Serialize};

use crate::models::User;

/// Bearer token plus the user it was issued to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub user: User,
}

/// Session store trait for different storage backends
pub trait SessionStore {
    fn get_session(&self) -> Option<StoredSession>;
    fn set_session(&mut self, session: StoredSession);
    fn clear_session(&mut self);
}
