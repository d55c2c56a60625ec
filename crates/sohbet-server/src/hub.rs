//! The broadcast hub.
//!
//! One task owns the registry of live connections. Everything that touches
//! it (joins, leaves, broadcasts) arrives as a [`Command`] on a single
//! ordered channel and is applied one at a time, so there is no lock around
//! the registry and the three operations interleave in arrival order.
//!
//! Fan-out never waits on a client. A mailbox that is full or closed gets
//! its connection evicted on the spot; dropping the hub's sender is what
//! tells that connection's write pump to shut down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sohbet_shared::constants::DEFAULT_CHANNEL;
use sohbet_shared::{ChatMessage, Notice, Payload};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::persistence::Persistence;

/// An outbound text frame, shared across every mailbox it is queued in.
pub type Frame = Arc<str>;

/// Hub commands buffered before senders have to wait.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// A connection as the hub sees it: an id and the sending half of its
/// mailbox. The hub holds the only sender.
pub struct Client {
    pub id: ConnectionId,
    pub mailbox: mpsc::Sender<Frame>,
}

pub enum Command {
    Register(Client),
    /// `username` is whatever the connection last asserted, for the log.
    Unregister {
        id: ConnectionId,
        username: String,
    },
    /// A JSON frame to persist (when applicable) and fan out.
    Broadcast(String),
}

/// Cloneable entry point into the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    online: Arc<AtomicUsize>,
}

impl HubHandle {
    pub async fn register(&self, client: Client) {
        self.send(Command::Register(client)).await;
    }

    pub async fn unregister(&self, id: ConnectionId, username: String) {
        self.send(Command::Unregister { id, username }).await;
    }

    pub async fn broadcast(&self, frame: String) {
        self.send(Command::Broadcast(frame)).await;
    }

    /// Connections registered as of the hub's last registry change.
    pub fn online(&self) -> usize {
        self.online.load(Ordering::Relaxed)
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("Hub stopped, dropping command");
        }
    }
}

pub struct Hub {
    clients: HashMap<ConnectionId, mpsc::Sender<Frame>>,
    persistence: Persistence,
    online: Arc<AtomicUsize>,
    commands: mpsc::Receiver<Command>,
}

impl Hub {
    pub fn new(persistence: Persistence) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let online = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            clients: HashMap::new(),
            persistence,
            online: Arc::clone(&online),
            commands: rx,
        };
        let handle = HubHandle {
            commands: tx,
            online,
        };
        (hub, handle)
    }

    /// Start the hub loop in the background. It runs until every handle
    /// has been dropped.
    pub fn spawn(persistence: Persistence) -> HubHandle {
        let (hub, handle) = Self::new(persistence);
        tokio::spawn(hub.run());
        handle
    }

    pub async fn run(mut self) {
        info!(persistence = self.persistence.is_enabled(), "Hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        info!("Hub stopped");
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::Register(client) => self.register(client),
            Command::Unregister { id, username } => self.unregister(id, &username),
            Command::Broadcast(frame) => self.broadcast(frame),
        }
    }

    fn register(&mut self, client: Client) {
        self.clients.insert(client.id, client.mailbox);
        self.sync_online();
        info!(connection = %client.id, online = self.clients.len(), "New connection");
        self.announce_presence();
    }

    fn unregister(&mut self, id: ConnectionId, username: &str) {
        // Removing the sender closes the mailbox.
        if self.clients.remove(&id).is_none() {
            return;
        }
        self.sync_online();

        if username.is_empty() {
            info!(connection = %id, "Connection closed");
        } else {
            info!(connection = %id, username, "User left");
        }
        self.announce_presence();
    }

    fn broadcast(&mut self, raw: String) {
        let message = match ChatMessage::decode(raw.as_bytes()) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Relaying undecodable frame as-is");
                self.deliver(Frame::from(raw));
                return;
            }
        };

        let channel = if message.channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            message.channel.as_str()
        };

        if let Some(target) = message.seen_target() {
            self.persistence
                .mark_seen(channel, target, &message.username);

            let notice = Notice::Seen {
                channel: channel.to_string(),
                timestamp: target,
                username: message.username.clone(),
            };
            match notice.to_json() {
                Ok(json) => self.deliver(Frame::from(json)),
                Err(e) => warn!(error = %e, "Failed to encode seen notice"),
            }
            return;
        }

        if message.payload != Payload::Seen {
            let channel = channel.to_string();
            self.persistence.append(&channel, message);
        }
        self.deliver(Frame::from(raw));
    }

    /// Tell everyone how many connections are registered.
    fn announce_presence(&mut self) {
        // Each eviction changes the count, so announce again until a pass
        // evicts nobody. The registry only shrinks, so this terminates.
        loop {
            let notice = Notice::UserCount {
                count: self.clients.len(),
                timestamp: Utc::now(),
            };
            let frame = match notice.to_json() {
                Ok(json) => Frame::from(json),
                Err(e) => {
                    warn!(error = %e, "Failed to encode user count");
                    return;
                }
            };
            if self.fan_out(&frame) == 0 {
                return;
            }
        }
    }

    /// Fan out one frame, then re-announce presence if anyone was dropped.
    fn deliver(&mut self, frame: Frame) {
        if self.fan_out(&frame) > 0 {
            self.announce_presence();
        }
    }

    /// Queue `frame` in every mailbox without waiting. Returns how many
    /// connections were evicted.
    fn fan_out(&mut self, frame: &Frame) -> usize {
        let mut evicted = Vec::new();
        for (id, mailbox) in &self.clients {
            match mailbox.try_send(Arc::clone(frame)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %id, "Mailbox full, disconnecting slow client");
                    evicted.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Mailbox closed, removing client");
                    evicted.push(*id);
                }
            }
        }

        for id in &evicted {
            self.clients.remove(id);
        }
        if !evicted.is_empty() {
            self.sync_online();
        }
        evicted.len()
    }

    fn sync_online(&self) {
        self.online.store(self.clients.len(), Ordering::Relaxed);
    }
}
