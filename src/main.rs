//! ridechat - conversation client for the ride-sharing backend
//!
//! Keeps conversations and messages in sync across REST fetches and
//! realtime `message.sent` events.

mod api;
mod commands;
mod config;
mod models;
mod realtime;
mod session;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::models::{ConversationId, User, UserId};

#[derive(Parser)]
#[command(name = "ridechat")]
#[command(about = "Conversation client for the ride-sharing backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a bearer token issued by the backend
    Signin {
        /// Access token
        #[arg(short, long)]
        token: String,

        /// Backend id of the signed-in user
        #[arg(short, long)]
        user_id: UserId,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Email address
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Clear the stored session
    Signout,

    /// Show configuration and session status
    Status,

    /// List conversations with unread counts
    Conversations,

    /// Print a conversation and mark it read
    Read {
        /// Conversation ID (from `conversations` output)
        conversation_id: ConversationId,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Send a message
    Send {
        /// Conversation ID (from `conversations` output)
        #[arg(short, long)]
        to: ConversationId,

        /// Message content
        message: String,
    },

    /// Follow conversations live over the realtime channel
    Watch {
        /// Conversation IDs to subscribe to
        #[arg(required = true)]
        conversation_ids: Vec<ConversationId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Signin {
            token,
            user_id,
            name,
            email,
        } => {
            let user = User {
                id: user_id,
                name,
                email,
            };
            session::sign_in(token, user).await?;
        }
        Commands::Signout => {
            session::sign_out().await?;
        }
        Commands::Status => {
            session::status().await?;
        }
        Commands::Conversations => {
            tracing::info!("Fetching conversations...");
            commands::list_conversations().await?;
        }
        Commands::Read {
            conversation_id,
            limit,
        } => {
            commands::read_conversation(conversation_id, limit).await?;
        }
        Commands::Send { to, message } => {
            tracing::info!("Sending message...");
            commands::send_message(to, &message).await?;
        }
        Commands::Watch { conversation_ids } => {
            commands::watch(conversation_ids).await?;
        }
    }

    Ok(())
}
