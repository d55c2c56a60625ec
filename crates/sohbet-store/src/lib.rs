//! # sohbet-store
//!
//! Bounded, time-limited per-channel message history.
//!
//! Storage is split in two layers. A [`ListStore`] is a minimal keyed-list
//! backend (push to head with trim and expiry, ranged reads, in-place
//! replacement, deletion) with an in-process implementation and a SQLite one.
//! [`MessageLog`] puts the chat semantics on top: one list per channel,
//! newest first, capped and expiring, with seen-acknowledgement updates.

pub mod list;
pub mod log;
pub mod memory;
pub mod migrations;
pub mod sqlite;

mod error;

pub use error::{Result, StoreError};
pub use list::{Edit, ListStore};
pub use log::{MessageLog, Retention};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
