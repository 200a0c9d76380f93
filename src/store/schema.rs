//! SQLite DDL definitions for the lingo session store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Current schema version stamp.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the session database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per conversation; mirrors Session fields.
CREATE TABLE IF NOT EXISTS sessions (
    id                   TEXT PRIMARY KEY,
    mode                 TEXT NOT NULL DEFAULT 'ai',
    provider             TEXT NOT NULL DEFAULT 'auto-free',
    preset               TEXT NOT NULL DEFAULT 'language-tutor',
    language             TEXT,
    user_language        TEXT NOT NULL DEFAULT 'English',
    timezone             TEXT NOT NULL DEFAULT 'UTC',
    system_prompt        TEXT,
    custom_system_prompt TEXT,
    predefined_index     INTEGER NOT NULL DEFAULT 0,
    summarize_after      INTEGER NOT NULL DEFAULT 20,
    active               INTEGER NOT NULL DEFAULT 1,
    next_proactive_at    INTEGER             -- epoch seconds, NULL = unscheduled
);

-- Due-session polling hits this on every scheduler tick.
CREATE INDEX IF NOT EXISTS idx_sessions_due
    ON sessions(active, next_proactive_at);

-- Append-only dialogue turns; rowid order is insertion order.
CREATE TABLE IF NOT EXISTS history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_history_session ON history(session_id, id);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times; all statements use `IF NOT EXISTS`.
/// Inserts the current schema version into `schema_meta` if not already
/// present.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the current schema version from the database.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_schema_creates_tables() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("apply");

        let count: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('sessions', 'history', 'schema_meta')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(count, 3);
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        apply_schema(&conn).expect("first apply");
        apply_schema(&conn).expect("second apply");
        assert_eq!(
            read_schema_version(&conn).expect("version"),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }
}
