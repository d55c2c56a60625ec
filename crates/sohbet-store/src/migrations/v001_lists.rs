//! v001 -- Keyed lists with per-key expiry.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- List entries: a higher id is a newer entry within its key.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS list_entries (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    key   TEXT NOT NULL,
    value TEXT NOT NULL                    -- serialized chat message
);

CREATE INDEX IF NOT EXISTS idx_list_entries_key_id
    ON list_entries(key, id DESC);

-- ----------------------------------------------------------------
-- Expiry, one row per live key.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS list_expiry (
    key        TEXT PRIMARY KEY NOT NULL,
    expires_at INTEGER NOT NULL            -- unix epoch, milliseconds
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
