//! Process-local [`ListStore`]. History lives as long as the process does.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, StoreError};
use crate::list::{Edit, ListStore};

#[derive(Debug)]
struct Entry {
    items: VecDeque<String>,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.lists
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Live entry for `key`, evicting it first if its TTL ran out.
    fn live<'a>(lists: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if lists.get(key).is_some_and(|entry| entry.is_expired(now)) {
            lists.remove(key);
        }
        lists.get_mut(key)
    }
}

impl ListStore for MemoryStore {
    fn push_front(&self, key: &str, value: &str, keep: usize, ttl: Duration) -> Result<()> {
        let mut lists = self.lock()?;
        let now = Instant::now();
        if lists.get(key).is_some_and(|entry| entry.is_expired(now)) {
            lists.remove(key);
        }

        let entry = lists.entry(key.to_string()).or_insert_with(|| Entry {
            items: VecDeque::new(),
            expires_at: Some(now),
        });
        entry.items.push_front(value.to_string());
        entry.items.truncate(keep);
        entry.expires_at = now.checked_add(ttl);
        Ok(())
    }

    fn range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut lists = self.lock()?;
        Ok(Self::live(&mut lists, key)
            .map(|entry| entry.items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn set(&self, key: &str, index: usize, value: &str) -> Result<()> {
        let mut lists = self.lock()?;
        let slot = Self::live(&mut lists, key)
            .and_then(|entry| entry.items.get_mut(index))
            .ok_or(StoreError::NotFound)?;
        *slot = value.to_string();
        Ok(())
    }

    fn update_first(
        &self,
        key: &str,
        limit: usize,
        edit: &mut dyn FnMut(&str) -> Result<Edit>,
    ) -> Result<bool> {
        let mut lists = self.lock()?;
        let Some(entry) = Self::live(&mut lists, key) else {
            return Ok(false);
        };
        for item in entry.items.iter_mut().take(limit) {
            match edit(item.as_str())? {
                Edit::Skip => continue,
                Edit::Stop => return Ok(false),
                Edit::Replace(value) => {
                    *item = value;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_push_front_orders_newest_first() {
        let store = MemoryStore::new();
        store.push_front("k", "a", 10, DAY).unwrap();
        store.push_front("k", "b", 10, DAY).unwrap();
        store.push_front("k", "c", 10, DAY).unwrap();

        assert_eq!(store.range("k", 10).unwrap(), vec!["c", "b", "a"]);
        assert_eq!(store.range("k", 2).unwrap(), vec!["c", "b"]);
    }

    #[test]
    fn test_push_front_trims_to_keep() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.push_front("k", &i.to_string(), 3, DAY).unwrap();
        }
        assert_eq!(store.range("k", 10).unwrap(), vec!["4", "3", "2"]);
    }

    #[test]
    fn test_expired_list_reads_empty() {
        let store = MemoryStore::new();
        store.push_front("k", "a", 10, Duration::ZERO).unwrap();
        assert!(store.range("k", 10).unwrap().is_empty());
        assert!(matches!(store.set("k", 0, "x"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_huge_ttl_does_not_poison_the_store() {
        let store = MemoryStore::new();
        store
            .push_front("k", "a", 10, Duration::from_secs(u64::MAX))
            .unwrap();
        store.push_front("k", "b", 10, DAY).unwrap();
        assert_eq!(store.range("k", 10).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let store = MemoryStore::new();
        store.push_front("k", "a", 10, DAY).unwrap();
        store.push_front("k", "b", 10, DAY).unwrap();

        store.set("k", 1, "A").unwrap();
        assert_eq!(store.range("k", 10).unwrap(), vec!["b", "A"]);
        assert!(matches!(store.set("k", 5, "x"), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_update_first_replaces_first_match_only() {
        let store = MemoryStore::new();
        for value in ["x1", "y", "x2"] {
            store.push_front("k", value, 10, DAY).unwrap();
        }

        let replaced = store
            .update_first("k", 10, &mut |v| {
                Ok(if v.starts_with('x') {
                    Edit::Replace(format!("{v}!"))
                } else {
                    Edit::Skip
                })
            })
            .unwrap();
        assert!(replaced);
        assert_eq!(store.range("k", 10).unwrap(), vec!["x2!", "y", "x1"]);
    }

    #[test]
    fn test_update_first_stop_and_limit() {
        let store = MemoryStore::new();
        store.push_front("k", "old", 10, DAY).unwrap();
        store.push_front("k", "new", 10, DAY).unwrap();

        assert!(!store.update_first("k", 10, &mut |_| Ok(Edit::Stop)).unwrap());
        let beyond_limit = store
            .update_first("k", 1, &mut |v| {
                Ok(if v == "old" {
                    Edit::Replace("changed".into())
                } else {
                    Edit::Skip
                })
            })
            .unwrap();
        assert!(!beyond_limit);
        assert!(!store.update_first("missing", 10, &mut |_| Ok(Edit::Stop)).unwrap());
        assert_eq!(store.range("k", 10).unwrap(), vec!["new", "old"]);
    }

    #[test]
    fn test_delete_and_missing_key() {
        let store = MemoryStore::new();
        store.push_front("k", "a", 10, DAY).unwrap();
        store.delete("k").unwrap();
        store.delete("never-existed").unwrap();
        assert!(store.range("k", 10).unwrap().is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.push_front("one", "a", 10, DAY).unwrap();
        store.push_front("two", "b", 10, DAY).unwrap();
        store.delete("one").unwrap();
        assert_eq!(store.range("two", 10).unwrap(), vec!["b"]);
    }
}
