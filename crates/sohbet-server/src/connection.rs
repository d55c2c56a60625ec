//! One client session: a read pump feeding the hub and a write pump
//! draining the mailbox the hub fills.
//!
//! The pumps are generic over the socket halves so they can be driven by
//! plain channels in tests.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use sohbet_shared::constants::{
    ANONYMOUS_USERNAME, DEFAULT_CHANNEL, PING_INTERVAL_SECS, WRITE_TIMEOUT_SECS,
};
use sohbet_shared::{ChatMessage, WireError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::hub::{Client, Frame, HubHandle};
use crate::persistence::Persistence;

/// Server-generated id of a connection. Only used for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub mailbox_capacity: usize,
    pub max_frame_bytes: usize,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub replay_limit: usize,
}

impl From<&ServerConfig> for PumpConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            max_frame_bytes: config.max_frame_bytes,
            ping_interval: config.ping_interval,
            read_timeout: config.read_timeout,
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            replay_limit: config.replay_limit,
        }
    }
}

/// What the read pump does with one inbound frame.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// Send the channel's backlog to this connection only.
    Replay { channel: String },
    /// Hand this JSON frame to the hub.
    Broadcast(String),
}

/// Run a connection to completion: register, pump both directions, then
/// unregister once either side ends.
pub async fn serve(socket: WebSocket, hub: HubHandle, persistence: Persistence, config: PumpConfig) {
    let id = ConnectionId::new();
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
    let (replay_tx, replay_rx) = mpsc::channel(config.replay_limit.max(1));

    hub.register(Client {
        id,
        mailbox: mailbox_tx,
    })
    .await;

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(
        sink,
        mailbox_rx,
        replay_rx,
        config.ping_interval,
        config.write_timeout,
    ));

    let reader = Reader {
        id,
        hub: &hub,
        persistence: &persistence,
        replay: &replay_tx,
        config: &config,
    };
    let mut username = String::new();
    let mut writer_done = false;

    tokio::select! {
        _ = reader.run(stream, &mut username) => {}
        _ = &mut writer => {
            writer_done = true;
        }
    }

    hub.unregister(id, username).await;

    // The hub dropped our mailbox, so the writer sends a close frame and
    // returns.
    if !writer_done {
        let _ = writer.await;
    }
    debug!(connection = %id, "Connection finished");
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

struct Reader<'a> {
    id: ConnectionId,
    hub: &'a HubHandle,
    persistence: &'a Persistence,
    replay: &'a mpsc::Sender<Frame>,
    config: &'a PumpConfig,
}

impl Reader<'_> {
    /// Read until the peer closes, errors, goes quiet past the read timeout
    /// or sends an oversized frame. `username` tracks the latest name the
    /// client asserted.
    async fn run<S, E>(&self, mut stream: S, username: &mut String)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let id = self.id;
        loop {
            let message = match tokio::time::timeout(self.config.read_timeout, stream.next()).await {
                Err(_) => {
                    debug!(connection = %id, "Read deadline passed");
                    return;
                }
                Ok(None) => return,
                Ok(Some(Err(e))) => {
                    debug!(connection = %id, error = %e, "Read failed");
                    return;
                }
                Ok(Some(Ok(message))) => message,
            };

            let raw: &[u8] = match &message {
                Message::Text(text) => text.as_str().as_bytes(),
                Message::Binary(data) => &data[..],
                // Any traffic, pings and pongs included, resets the deadline.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return,
            };

            if raw.len() > self.config.max_frame_bytes {
                warn!(
                    connection = %id,
                    size = raw.len(),
                    max = self.config.max_frame_bytes,
                    "Frame too large, disconnecting"
                );
                return;
            }

            match ingest(raw, username, Utc::now()) {
                Ok(Inbound::Replay { channel }) => self.replay(&channel, username).await,
                Ok(Inbound::Broadcast(frame)) => self.hub.broadcast(frame).await,
                Err(e) => warn!(connection = %id, error = %e, "Failed to re-encode message"),
            }
        }
    }

    /// Queue the channel's backlog on this connection's private lane.
    /// Messages that do not fit are skipped.
    async fn replay(&self, channel: &str, username: &str) {
        let backlog = self
            .persistence
            .recent(channel, self.config.replay_limit)
            .await;
        info!(
            connection = %self.id,
            channel,
            username,
            count = backlog.len(),
            "Sending recent messages"
        );

        for message in backlog {
            let frame = match message.encode() {
                Ok(json) => Frame::from(json),
                Err(e) => {
                    debug!(error = %e, "Skipping unencodable history entry");
                    continue;
                }
            };
            if self.replay.try_send(frame).is_err() {
                debug!(connection = %self.id, "Replay lane full, skipping message");
            }
        }
    }
}

/// Turn one inbound frame into an action.
///
/// A frame that is not valid JSON becomes a plain text message in the
/// default channel under the connection's current name. A valid one may
/// update that name; it then gets server defaults and a fresh timestamp.
pub fn ingest(raw: &[u8], username: &mut String, now: DateTime<Utc>) -> Result<Inbound, WireError> {
    let message = match ChatMessage::decode(raw) {
        Ok(mut message) => {
            if !message.username.is_empty() && message.username != *username {
                if username.is_empty() {
                    debug!(username = %message.username, "Username set");
                }
                username.clone_from(&message.username);
            }
            message.normalize(now);

            if message.is_replay_request() {
                return Ok(Inbound::Replay {
                    channel: message.channel,
                });
            }
            message
        }
        Err(e) => {
            debug!(error = %e, "Treating frame as plain text");
            let name = if username.is_empty() {
                ANONYMOUS_USERNAME
            } else {
                username.as_str()
            };
            ChatMessage::text(name, String::from_utf8_lossy(raw), DEFAULT_CHANNEL, now)
        }
    };

    Ok(Inbound::Broadcast(message.encode()?))
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

/// Drain the mailbox and the replay lane into the socket, pinging on an
/// interval. Ends on a write failure or once the hub closes the mailbox.
///
/// A zero `ping_interval` falls back to the default period.
pub async fn write_pump<S>(
    mut sink: S,
    mut mailbox: mpsc::Receiver<Frame>,
    mut replay: mpsc::Receiver<Frame>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let ping_interval = if ping_interval.is_zero() {
        Duration::from_secs(PING_INTERVAL_SECS)
    } else {
        ping_interval
    };
    let start = tokio::time::Instant::now() + ping_interval;
    let mut ping = tokio::time::interval_at(start, ping_interval);

    loop {
        let outbound = tokio::select! {
            frame = mailbox.recv() => match frame {
                Some(frame) => Message::Text(coalesce(frame, &mut mailbox).into()),
                None => {
                    let _ = write(&mut sink, Message::Close(None), write_timeout).await;
                    return;
                }
            },
            Some(frame) = replay.recv() => Message::Text(coalesce(frame, &mut replay).into()),
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        if !write(&mut sink, outbound, write_timeout).await {
            return;
        }
    }
}

/// Join `first` with every frame already waiting behind it, newline
/// separated, in queue order.
fn coalesce(first: Frame, queue: &mut mpsc::Receiver<Frame>) -> String {
    let mut text = String::from(&*first);
    while let Ok(next) = queue.try_recv() {
        text.push('\n');
        text.push_str(&next);
    }
    text
}

async fn write<S>(sink: &mut S, message: Message, timeout: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(timeout, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Write failed");
            false
        }
        Err(_) => {
            debug!("Write timed out");
            false
        }
    }
}
