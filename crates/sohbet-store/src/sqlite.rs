//! SQLite-backed [`ListStore`].
//!
//! History survives restarts. The [`rusqlite::Connection`] sits behind a
//! mutex; every list operation is a single short statement or transaction,
//! so contention stays low at chat volumes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::list::{Edit, ListStore};
use crate::migrations;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a history database at `path`, creating parent
    /// directories as needed.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening history database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().ok()?.path().map(PathBuf::from)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Drop `key` entirely if its TTL has run out.
fn purge_if_expired(conn: &Connection, key: &str) -> Result<()> {
    let expired: Option<bool> = conn
        .query_row(
            "SELECT expires_at <= ?2 FROM list_expiry WHERE key = ?1",
            params![key, now_millis()],
            |row| row.get(0),
        )
        .optional()?;

    if expired.unwrap_or(false) {
        delete_key(conn, key)?;
    }
    Ok(())
}

fn delete_key(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM list_entries WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM list_expiry WHERE key = ?1", params![key])?;
    Ok(())
}

impl ListStore for SqliteStore {
    fn push_front(&self, key: &str, value: &str, keep: usize, ttl: Duration) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        purge_if_expired(&tx, key)?;

        tx.execute(
            "INSERT INTO list_entries (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        tx.execute(
            "DELETE FROM list_entries
             WHERE key = ?1
               AND id NOT IN (
                   SELECT id FROM list_entries
                   WHERE key = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![key, keep as i64],
        )?;

        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);
        tx.execute(
            "INSERT INTO list_expiry (key, expires_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
            params![key, expires_at],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.lock()?;
        purge_if_expired(&conn, key)?;

        let mut stmt = conn.prepare(
            "SELECT value FROM list_entries
             WHERE key = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![key, limit as i64], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }

    fn set(&self, key: &str, index: usize, value: &str) -> Result<()> {
        let conn = self.lock()?;
        purge_if_expired(&conn, key)?;

        let id: i64 = conn
            .query_row(
                "SELECT id FROM list_entries
                 WHERE key = ?1
                 ORDER BY id DESC
                 LIMIT 1 OFFSET ?2",
                params![key, index as i64],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        conn.execute(
            "UPDATE list_entries SET value = ?1 WHERE id = ?2",
            params![value, id],
        )?;
        Ok(())
    }

    fn update_first(
        &self,
        key: &str,
        limit: usize,
        edit: &mut dyn FnMut(&str) -> Result<Edit>,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        purge_if_expired(&tx, key)?;

        let mut stmt = tx.prepare(
            "SELECT id, value FROM list_entries
             WHERE key = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let mapped = stmt.query_map(params![key, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut rows = Vec::new();
        for row in mapped {
            rows.push(row?);
        }
        drop(stmt);

        for (id, value) in rows {
            match edit(&value)? {
                Edit::Skip => continue,
                Edit::Stop => break,
                Edit::Replace(updated) => {
                    tx.execute(
                        "UPDATE list_entries SET value = ?1 WHERE id = ?2",
                        params![updated, id],
                    )?;
                    tx.commit()?;
                    return Ok(true);
                }
            }
        }

        tx.commit()?;
        Ok(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        delete_key(&conn, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");

        let store = SqliteStore::open_at(&path).expect("should open");
        assert!(store.path().is_some());
        store.push_front("k", "a", 10, DAY).unwrap();
        drop(store);

        let reopened = SqliteStore::open_at(&path).unwrap();
        assert_eq!(reopened.range("k", 10).unwrap(), vec!["a"]);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .push_front("k", "a", 10, Duration::from_secs(u64::MAX))
            .unwrap();
        assert_eq!(store.range("k", 10).unwrap(), vec!["a"]);

        let expires_at: i64 = store
            .lock()
            .unwrap()
            .query_row(
                "SELECT expires_at FROM list_expiry WHERE key = 'k'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(expires_at, i64::MAX);
    }

    #[test]
    fn push_front_trims_and_orders() {
        let store = SqliteStore::in_memory().unwrap();
        for i in 0..5 {
            store.push_front("k", &i.to_string(), 3, DAY).unwrap();
        }
        assert_eq!(store.range("k", 10).unwrap(), vec!["4", "3", "2"]);
        assert_eq!(store.range("k", 1).unwrap(), vec!["4"]);
    }

    #[test]
    fn expired_key_is_purged() {
        let store = SqliteStore::in_memory().unwrap();
        store.push_front("k", "old", 10, Duration::ZERO).unwrap();
        assert!(store.range("k", 10).unwrap().is_empty());

        store.push_front("k", "new", 10, DAY).unwrap();
        assert_eq!(store.range("k", 10).unwrap(), vec!["new"]);
    }

    #[test]
    fn set_by_index() {
        let store = SqliteStore::in_memory().unwrap();
        store.push_front("k", "a", 10, DAY).unwrap();
        store.push_front("k", "b", 10, DAY).unwrap();

        store.set("k", 1, "A").unwrap();
        assert_eq!(store.range("k", 10).unwrap(), vec!["b", "A"]);
        assert!(matches!(store.set("k", 7, "x"), Err(StoreError::NotFound)));
    }

    #[test]
    fn update_first_rewrites_in_one_transaction() {
        let store = SqliteStore::in_memory().unwrap();
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
        assert!(!store.update_first("k", 10, &mut |_| Ok(Edit::Stop)).unwrap());
    }

    #[test]
    fn delete_is_scoped_to_key() {
        let store = SqliteStore::in_memory().unwrap();
        store.push_front("one", "a", 10, DAY).unwrap();
        store.push_front("two", "b", 10, DAY).unwrap();

        store.delete("one").unwrap();
        store.delete("missing").unwrap();
        assert!(store.range("one", 10).unwrap().is_empty());
        assert_eq!(store.range("two", 10).unwrap(), vec!["b"]);
    }
}
