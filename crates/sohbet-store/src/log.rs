//! Per-channel chat history on top of a [`ListStore`].
//!
//! Each channel is one list keyed `sohbet:messages:<channel>`, newest entry
//! first, every entry a serialized [`ChatMessage`]. Appends trim the list to
//! [`Retention::max_entries`] and refresh its TTL, so history is both capped
//! and time-boxed: old messages are discarded, never archived.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sohbet_shared::constants::{HISTORY_KEY_PREFIX, HISTORY_LIMIT, HISTORY_TTL_SECS, SEEN_WINDOW};
use sohbet_shared::ChatMessage;
use tracing::debug;

use crate::error::Result;
use crate::list::{Edit, ListStore};

/// How much history a channel keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Entries kept per channel.
    pub max_entries: usize,
    /// Lifetime of a channel log after its last append.
    pub ttl: Duration,
    /// Newest entries searched when applying a seen acknowledgement.
    pub seen_window: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_entries: HISTORY_LIMIT,
            ttl: Duration::from_secs(HISTORY_TTL_SECS),
            seen_window: SEEN_WINDOW,
        }
    }
}

pub struct MessageLog {
    store: Box<dyn ListStore>,
    retention: Retention,
}

impl MessageLog {
    pub fn new(store: impl ListStore + 'static, retention: Retention) -> Self {
        Self {
            store: Box::new(store),
            retention,
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Add `message` as the newest entry of `channel`.
    pub fn append(&self, channel: &str, message: &ChatMessage) -> Result<()> {
        self.store.push_front(
            &channel_key(channel),
            &message.encode()?,
            self.retention.max_entries,
            self.retention.ttl,
        )
    }

    /// Up to `limit` most recent messages of `channel`, oldest first.
    /// Entries that no longer decode are skipped.
    pub fn recent(&self, channel: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let raw = self.store.range(&channel_key(channel), limit)?;

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw.iter().rev() {
            match ChatMessage::decode(entry.as_bytes()) {
                Ok(message) => messages.push(message),
                Err(e) => debug!(channel, error = %e, "Skipping undecodable history entry"),
            }
        }
        Ok(messages)
    }

    /// Record that `username` saw the message of `channel` stamped `target`
    /// (matched at second resolution within the seen window).
    ///
    /// Returns `true` if an entry was updated. No match, or a username that
    /// is already recorded, is not an error.
    pub fn mark_seen(&self, channel: &str, target: DateTime<Utc>, username: &str) -> Result<bool> {
        let mut matched = false;
        let mut edit = |entry: &str| -> Result<Edit> {
            let Ok(mut message) = ChatMessage::decode(entry.as_bytes()) else {
                return Ok(Edit::Skip);
            };
            if !message.same_second(target) {
                return Ok(Edit::Skip);
            }
            matched = true;
            if !message.add_seen_by(username) {
                return Ok(Edit::Stop);
            }
            Ok(Edit::Replace(message.encode()?))
        };
        let key = channel_key(channel);
        let replaced = self
            .store
            .update_first(&key, self.retention.seen_window, &mut edit)?;

        if !matched {
            debug!(channel, %target, "Seen target not in recent window");
        }
        Ok(replaced)
    }

    /// Delete the entire history of `channel`.
    pub fn clear(&self, channel: &str) -> Result<()> {
        self.store.delete(&channel_key(channel))
    }
}

fn channel_key(channel: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}{channel}")
}
