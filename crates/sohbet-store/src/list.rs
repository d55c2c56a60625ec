use std::time::Duration;

use crate::error::Result;

/// Verdict of an [`ListStore::update_first`] callback on one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Not this entry; keep scanning.
    Skip,
    /// Stop scanning without writing anything.
    Stop,
    /// Replace this entry and stop.
    Replace(String),
}

/// Keyed list storage, newest entry at index 0.
///
/// Implementations must be safe to share across threads; calls for
/// different keys may run concurrently.
pub trait ListStore: Send + Sync {
    /// Push `value` to the head of `key`, drop everything past the newest
    /// `keep` entries and (re)arm the list's time-to-live.
    fn push_front(&self, key: &str, value: &str, keep: usize, ttl: Duration) -> Result<()>;

    /// Up to `limit` entries, newest first. A missing or expired key is empty.
    fn range(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    /// Replace the entry at `index` (0 = newest).
    fn set(&self, key: &str, index: usize, value: &str) -> Result<()>;

    /// Walk the newest `limit` entries of `key` and apply `edit` to each
    /// until it returns something other than [`Edit::Skip`]. The read and
    /// the write happen as one step: no push or delete on the same store
    /// lands in between. Returns whether an entry was replaced.
    fn update_first(
        &self,
        key: &str,
        limit: usize,
        edit: &mut dyn FnMut(&str) -> Result<Edit>,
    ) -> Result<bool>;

    /// Delete the whole list. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}
