//! Pusher connection task with automatic reconnection

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use super::protocol::{self, ConnectionEstablished, ErrorData, Frame};
use super::websocket::PusherSocket;
use super::{ChannelEvent, RealtimeChannel};
use crate::config::RealtimeConfig;

/// How long to wait for `pusher:connection_established` after connecting.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for `pusher:pong` after sending `pusher:ping`.
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

/// Reset backoff after this much connected time.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);

const MAX_BACKOFF_SECS: u64 = 64;

enum Command {
    Subscribe {
        channel: String,
        events: mpsc::UnboundedSender<ChannelEvent>,
    },
    Unsubscribe {
        channel: String,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Reason the session loop exited.
enum DisconnectReason {
    /// Disconnect requested (or every handle dropped). Do not reconnect.
    Shutdown(Option<oneshot::Sender<()>>),
    /// Server refused the application (4000-4099). Do not reconnect.
    Fatal(anyhow::Error),
    /// Transport error or server close. Should reconnect.
    Error(anyhow::Error),
}

type Bindings = HashMap<String, mpsc::UnboundedSender<ChannelEvent>>;

/// Handle to the background websocket task.
///
/// The websocket lives until `disconnect()` is called or every handle is dropped.
pub struct PusherConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    socket_id: String,
}

impl PusherConnection {
    /// Connect and complete the Pusher handshake, then hand the socket to a
    /// background task. Fails if the first connection cannot be established.
    pub async fn connect(config: &RealtimeConfig) -> Result<Self> {
        Self::connect_url(config.ws_url()).await
    }

    pub async fn connect_url(ws_url: String) -> Result<Self> {
        let (socket, established) = open(&ws_url).await?;
        let socket_id = established.socket_id.clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(ws_url, socket, established, cmd_rx));

        Ok(Self { cmd_tx, socket_id })
    }

    /// Socket id assigned on the first connection.
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if self.cmd_tx.send(cmd).is_err() {
            bail!("Realtime connection is closed");
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeChannel for PusherConnection {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let (events, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe {
            channel: channel.to_string(),
            events,
        })?;
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.send(Command::Unsubscribe {
            channel: channel.to_string(),
        })
    }

    async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(Command::Disconnect { done }).is_ok() {
            let _ = wait.await;
        }
    }
}

/// Connect and wait for `pusher:connection_established`.
async fn open(ws_url: &str) -> Result<(PusherSocket, ConnectionEstablished)> {
    let mut socket = PusherSocket::connect(ws_url).await?;

    let text = time::timeout(HANDSHAKE_TIMEOUT, socket.recv_frame())
        .await
        .context("Timed out waiting for connection_established")??
        .context("Connection closed before handshake")?;
    let frame = Frame::parse(&text)?;

    match frame.event.as_str() {
        protocol::CONNECTION_ESTABLISHED => {
            let established: ConnectionEstablished = serde_json::from_value(frame.data)
                .context("Invalid connection_established payload")?;
            Ok((socket, established))
        }
        protocol::ERROR => {
            let err: ErrorData = serde_json::from_value(frame.data).unwrap_or_default();
            bail!(
                "Server refused connection (code {:?}): {}",
                err.code,
                err.message.unwrap_or_default()
            )
        }
        other => bail!("Expected connection_established, got {}", other),
    }
}

/// Connection task: run sessions, reconnecting with exponential backoff
/// (1s, 2s, 4s, ... capped at 64s). Bindings survive reconnects and are
/// re-subscribed on each new session.
async fn run(
    ws_url: String,
    socket: PusherSocket,
    established: ConnectionEstablished,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut bindings = Bindings::new();
    let mut backoff = 1u64;
    let mut current = Some((socket, established));

    loop {
        let (socket, established) = match current.take() {
            Some(c) => c,
            None => match open(&ws_url).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        "Realtime reconnect failed: {:#}. Retrying in {}s...",
                        e,
                        backoff
                    );
                    if !wait_backoff(backoff, &mut bindings, &mut cmd_rx).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            },
        };

        let connected_at = Instant::now();
        match session(socket, established, &mut bindings, &mut cmd_rx).await {
            DisconnectReason::Shutdown(done) => {
                tracing::info!("Realtime connection closed");
                cmd_rx.close();
                if let Some(done) = done {
                    let _ = done.send(());
                }
                return;
            }
            DisconnectReason::Fatal(e) => {
                tracing::error!("Realtime connection refused: {:#}", e);
                return;
            }
            DisconnectReason::Error(e) => {
                if connected_at.elapsed() >= STABILITY_THRESHOLD {
                    backoff = 1;
                }
                tracing::warn!("Realtime disconnected: {:#}. Reconnecting in {}s...", e, backoff);
                if !wait_backoff(backoff, &mut bindings, &mut cmd_rx).await {
                    return;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }
}

/// Sleep for the backoff while still accepting binding changes.
///
/// Returns false if shutdown was requested.
async fn wait_backoff(
    secs: u64,
    bindings: &mut Bindings,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let sleep = time::sleep(Duration::from_secs(secs));
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Subscribe { channel, events }) => {
                    bindings.insert(channel, events);
                }
                Some(Command::Unsubscribe { channel }) => {
                    bindings.remove(&channel);
                }
                Some(Command::Disconnect { done }) => {
                    cmd_rx.close();
                    let _ = done.send(());
                    return false;
                }
                None => return false,
            },
        }
    }
}

/// One connected session: re-bind channels, then pump frames and commands.
async fn session(
    mut socket: PusherSocket,
    established: ConnectionEstablished,
    bindings: &mut Bindings,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> DisconnectReason {
    tracing::info!("Realtime connected (socket_id={})", established.socket_id);

    for channel in bindings.keys() {
        if let Err(e) = socket.send_text(&protocol::subscribe(channel)).await {
            return DisconnectReason::Error(e.context("Re-subscribe failed"));
        }
    }

    let activity = Duration::from_secs(established.activity_timeout.max(1));
    let idle = time::sleep(activity);
    tokio::pin!(idle);
    let mut awaiting_pong = false;

    let reason = loop {
        tokio::select! {
            frame = socket.recv_frame() => match frame {
                Ok(Some(text)) => {
                    idle.as_mut().reset(Instant::now() + activity);
                    awaiting_pong = false;
                    if let Some(reason) = handle_frame(&text, &mut socket, bindings).await {
                        break reason;
                    }
                }
                Ok(None) => {
                    break DisconnectReason::Error(anyhow::anyhow!("WebSocket closed by server"));
                }
                Err(e) => {
                    break DisconnectReason::Error(e.context("WebSocket recv error"));
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Subscribe { channel, events }) => {
                    let is_new = bindings.insert(channel.clone(), events).is_none();
                    if is_new {
                        if let Err(e) = socket.send_text(&protocol::subscribe(&channel)).await {
                            break DisconnectReason::Error(e.context("Subscribe failed"));
                        }
                    }
                }
                Some(Command::Unsubscribe { channel }) => {
                    if bindings.remove(&channel).is_some() {
                        if let Err(e) = socket.send_text(&protocol::unsubscribe(&channel)).await {
                            break DisconnectReason::Error(e.context("Unsubscribe failed"));
                        }
                    }
                }
                Some(Command::Disconnect { done }) => break DisconnectReason::Shutdown(Some(done)),
                None => break DisconnectReason::Shutdown(None),
            },
            _ = &mut idle => {
                if awaiting_pong {
                    break DisconnectReason::Error(anyhow::anyhow!(
                        "No pong within {:?}",
                        PONG_TIMEOUT
                    ));
                }
                if let Err(e) = socket.send_text(&protocol::ping()).await {
                    break DisconnectReason::Error(e.context("Ping send failed"));
                }
                awaiting_pong = true;
                idle.as_mut().reset(Instant::now() + PONG_TIMEOUT);
            }
        }
    };

    if let DisconnectReason::Shutdown(_) = reason {
        bindings.clear();
        socket.close().await;
    }
    reason
}

/// Handle one incoming frame. Returns a reason when the session must end.
async fn handle_frame(
    text: &str,
    socket: &mut PusherSocket,
    bindings: &mut Bindings,
) -> Option<DisconnectReason> {
    let frame = match Frame::parse(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Ignoring frame: {:#}", e);
            return None;
        }
    };

    let is_protocol = frame.is_protocol();
    let Frame {
        event,
        channel,
        data,
    } = frame;

    match event.as_str() {
        protocol::PING => {
            if let Err(e) = socket.send_text(&protocol::pong()).await {
                return Some(DisconnectReason::Error(e.context("Pong send failed")));
            }
        }
        protocol::PONG => tracing::debug!("Pong from server"),
        protocol::SUBSCRIPTION_SUCCEEDED => {
            tracing::info!(
                "Subscribed to {}",
                channel.as_deref().unwrap_or("?")
            );
        }
        protocol::ERROR => {
            let err: ErrorData = serde_json::from_value(data).unwrap_or_default();
            let msg = err.message.clone().unwrap_or_default();
            if err.is_fatal() {
                return Some(DisconnectReason::Fatal(anyhow::anyhow!(
                    "pusher:error {:?}: {}",
                    err.code,
                    msg
                )));
            }
            tracing::warn!("pusher:error {:?}: {}", err.code, msg);
        }
        _ if is_protocol => tracing::debug!("Protocol event {}", event),
        _ => {
            let Some(channel) = channel else {
                tracing::debug!("Event {} without channel", event);
                return None;
            };
            let delivered = match bindings.get(&channel) {
                Some(tx) => tx
                    .send(ChannelEvent {
                        event: event.clone(),
                        data,
                    })
                    .is_ok(),
                None => {
                    tracing::debug!("Event on unbound channel {}", channel);
                    return None;
                }
            };
            // Receiver dropped: release the binding.
            if !delivered {
                bindings.remove(&channel);
                if let Err(e) = socket.send_text(&protocol::unsubscribe(&channel)).await {
                    return Some(DisconnectReason::Error(e.context("Unsubscribe failed")));
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    const ESTABLISHED: &str = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.1\",\"activity_timeout\":120}"}"#;

    /// Bind a local websocket server and return its URL plus the listener.
    async fn local_server() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (format!("ws://{}/app/local?protocol=7", addr), listener)
    }

    async fn next_text<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => return serde_json::from_str(&t).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_receive_event() {
        let (url, listener) = local_server().await;

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(ESTABLISHED.into())).await.unwrap();

            let sub = next_text(&mut ws).await;
            assert_eq!(sub["event"], "pusher:subscribe");
            assert_eq!(sub["data"]["channel"], "conversation.42");

            ws.send(Message::Text(
                r#"{"event":"pusher:ping","data":{}}"#.into(),
            ))
            .await
            .unwrap();
            let pong = next_text(&mut ws).await;
            assert_eq!(pong["event"], "pusher:pong");

            ws.send(Message::Text(
                r#"{"event":"message.sent","channel":"conversation.42","data":"{\"message\":{\"id\":1}}"}"#.into(),
            ))
            .await
            .unwrap();

            let unsub = next_text(&mut ws).await;
            assert_eq!(unsub["event"], "pusher:unsubscribe");
        });

        let conn = PusherConnection::connect_url(url).await.unwrap();
        assert_eq!(conn.socket_id(), "1.1");

        let mut rx = conn.subscribe("conversation.42").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, "message.sent");
        assert_eq!(event.data["message"]["id"], 1);

        conn.unsubscribe("conversation.42").await.unwrap();
        server.await.unwrap();
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_handshake_error_fails_connect() {
        let (url, listener) = local_server().await;

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(
                r#"{"event":"pusher:error","data":{"code":4001,"message":"App key local not in this cluster"}}"#.into(),
            ))
            .await
            .unwrap();
        });

        let err = PusherConnection::connect_url(url).await.err().unwrap();
        assert!(format!("{:#}", err).contains("4001"));
    }

    #[tokio::test]
    async fn test_disconnect_closes_bindings() {
        let (url, listener) = local_server().await;

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text(ESTABLISHED.into())).await.unwrap();
            // Drain until the client closes.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = PusherConnection::connect_url(url).await.unwrap();
        let mut rx = conn.subscribe("conversation.1").await.unwrap();
        conn.disconnect().await;

        assert!(rx.recv().await.is_none());
        assert!(conn.subscribe("conversation.2").await.is_err());
    }
}
