//! CLI commands driving the sync engine

use anyhow::Result;
use chrono::Local;
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::models::{ConversationId, Message, MessageId};
use crate::session::ChatSession;
use crate::sync::{ConversationSyncEngine, SyncUpdate};

/// Label for a message author as seen by the current user.
fn sender_label(engine: &ConversationSyncEngine, msg: &Message) -> String {
    if msg.sender_id == engine.current_user() {
        return "You".to_string();
    }
    engine
        .conversation(msg.conversation_id)
        .map(|c| c.other_user_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("user {}", msg.sender_id))
}

fn print_message(engine: &ConversationSyncEngine, msg: &Message) {
    let time = msg.created_at.with_timezone(&Local).format("%H:%M");
    println!("[{}] {}: {}", time, sender_label(engine, msg), msg.content);
}

/// List conversations with unread badges.
pub async fn list_conversations() -> Result<()> {
    let config = Config::load()?;
    let session = ChatSession::open(&config, false).await?;
    let engine = session.engine();

    engine.load_conversations().await?;
    let conversations = engine.conversations();

    println!("\nConversations:");
    println!("{:-<60}", "");

    if conversations.is_empty() {
        println!("  (no conversations)");
    }

    for conv in &conversations {
        if conv.unread_count > 0 {
            println!("{} ({} unread)", conv.other_user_name, conv.unread_count);
        } else {
            println!("{}", conv.other_user_name);
        }
        println!("  ID: {}", conv.conversation_id);
        println!("  {}", conv.preview());
        println!();
    }

    if engine.total_unread() > 0 {
        println!("{} unread in total", engine.total_unread());
    }

    session.close().await;
    Ok(())
}

/// Print a conversation's history and mark it read.
pub async fn read_conversation(conversation_id: ConversationId, limit: usize) -> Result<()> {
    let config = Config::load()?;
    let session = ChatSession::open(&config, false).await?;
    let engine = session.engine();

    // Only used for the sender label; history still prints without it.
    if let Err(e) = engine.load_conversations().await {
        tracing::debug!("Continuing without conversation list: {}", e);
    }
    engine.load_messages(conversation_id).await?;

    let msgs = engine.get_messages(conversation_id);
    if msgs.is_empty() {
        println!("(no messages)");
    }
    let skip = msgs.len().saturating_sub(limit);
    for msg in &msgs[skip..] {
        print_message(engine, msg);
    }

    let unread = engine.held_unread(conversation_id);
    engine.mark_as_read(conversation_id).await?;
    if unread > 0 {
        tracing::info!("Marked {} messages read", unread);
    }

    session.close().await;
    Ok(())
}

/// Send a message.
pub async fn send_message(conversation_id: ConversationId, content: &str) -> Result<()> {
    let config = Config::load()?;
    let session = ChatSession::open(&config, false).await?;

    let sent = session.engine().send_message(conversation_id, content).await?;
    tracing::debug!("Created message {}", sent.id);
    println!("Message sent.");

    session.close().await;
    Ok(())
}

/// Print messages of `conversation_id` not printed yet.
fn print_new(
    engine: &ConversationSyncEngine,
    conversation_id: ConversationId,
    seen: &mut HashMap<ConversationId, HashSet<MessageId>>,
) {
    let seen = seen.entry(conversation_id).or_default();
    for msg in engine.get_messages(conversation_id) {
        if seen.insert(msg.id) {
            print_message(engine, &msg);
        }
    }
}

/// Open conversations, then print live messages until Ctrl-C.
pub async fn watch(conversation_ids: Vec<ConversationId>) -> Result<()> {
    let config = Config::load()?;
    let session = ChatSession::open(&config, true).await?;
    let engine = session.engine().clone();

    if let Err(e) = engine.load_conversations().await {
        tracing::warn!("Continuing without conversation list: {}", e);
    }

    let mut updates = engine.updates();
    let mut seen = HashMap::new();

    for &id in &conversation_ids {
        engine.open_conversation(id).await?;
        print_new(&engine, id, &mut seen);
    }

    println!(
        "Watching {} conversation(s) as {}. (Ctrl-C to stop)",
        conversation_ids.len(),
        session.user().name
    );

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(SyncUpdate::Messages(id)) if conversation_ids.contains(&id) => {
                    print_new(&engine, id, &mut seen);
                }
                Ok(SyncUpdate::Conversation(id)) if conversation_ids.contains(&id) => {
                    if let Some(conv) = engine.conversation(id) {
                        tracing::debug!("{}: {} unread", conv.other_user_name, conv.unread_count);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Skipped {} updates, rescanning", n);
                    for &id in &conversation_ids {
                        print_new(&engine, id, &mut seen);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}
