//! Session management
//!
//! The backend issues the bearer token; this module only stores it with the
//! signed-in user and clears it again on sign-out.

mod chat_session;
mod store;

use anyhow::{bail, Result};

pub use chat_session::ChatSession;
pub use store::{SessionStore, StoredSession};

use crate::config::Config;
use crate::models::User;

/// Store a token and user as the active session.
pub async fn sign_in(token: String, user: User) -> Result<()> {
    if token.trim().is_empty() {
        bail!("Token must not be empty");
    }

    let mut config = Config::load()?;
    let name = user.name.clone();
    config.set_session(StoredSession {
        access_token: token,
        user,
    });
    config.save()?;
    println!("Signed in as {}.", name);
    Ok(())
}

/// Clear the stored session
pub async fn sign_out() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_session();
    config.save()?;
    println!("Signed out.");
    Ok(())
}

/// Display current session status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("API:      {}", config.api_url());
    println!("Realtime: {}", config.realtime.ws_url());
    match config.get_session() {
        Some(session) => {
            println!("Session:  signed in");
            println!("  user:  {} (id {})", session.user.name, session.user.id);
            if let Some(ref email) = session.user.email {
                println!("  email: {}", email);
            }
        }
        None => println!("Session:  none"),
    }

    Ok(())
}
