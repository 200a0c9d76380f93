//! SQLite-backed session store and history log.
//!
//! One database file holds every session row and its dialogue history.
//! Thread-safe via an internal `Mutex<Connection>`; all writes are
//! serialized, and WAL mode keeps reads cheap on the SQLite side.

mod schema;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};

pub use types::{
    clamp_summarize_after, HistoryEntry, Mode, Role, Session, SessionPatch, SessionStats,
    SUMMARIZE_AFTER_MAX, SUMMARIZE_AFTER_MIN, SUMMARY_PREFIX,
};

pub(crate) use types::now_epoch_secs;

/// Database filename within the storage root directory.
const DB_FILENAME: &str = "lingo.db";

/// Errors from the SQLite session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// SQLite-backed store for sessions and their history.
pub struct SessionStore {
    root: PathBuf,
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the database at `{root_dir}/lingo.db`.
    ///
    /// Applies the schema if the database is new.
    pub fn open(root_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root_dir).map_err(|e| StoreError::Io(e.to_string()))?;
        let db_path = root_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            root: root_dir.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Returns the storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(schema::read_schema_version(&conn)?)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Return the existing session or atomically insert one with defaults.
    ///
    /// `INSERT OR IGNORE` keyed on the primary key makes concurrent calls
    /// for the same unseen id leave exactly one row.
    pub fn get_or_create(&self, id: &str) -> Result<Session, StoreError> {
        let conn = self.lock()?;
        conn.execute("INSERT OR IGNORE INTO sessions (id) VALUES (?1)", [id])?;
        let session = conn.query_row(SELECT_SESSION_BY_ID, [id], row_to_session)?;
        Ok(session)
    }

    /// Look up a session without creating it.
    pub fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.lock()?;
        let session = conn
            .query_row(SELECT_SESSION_BY_ID, [id], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// Update only the named columns, leaving others untouched.
    ///
    /// The scheduler and the message handler update disjoint field sets
    /// concurrently; a full-row overwrite would let one path clobber the
    /// other, so the SET clause is built from the patch alone.
    ///
    /// `summarize_after` is clamped to its allowed range on write. Setting
    /// `active = false` also clears `next_proactive_at`, preserving the
    /// invariant that only active sessions carry a schedule.
    pub fn patch(&self, id: &str, patch: &SessionPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(mode) = patch.mode {
            sets.push("mode = ?");
            values.push(Value::Text(mode.as_str().to_owned()));
        }
        if let Some(ref provider) = patch.provider {
            sets.push("provider = ?");
            values.push(Value::Text(provider.clone()));
        }
        if let Some(ref preset) = patch.preset {
            sets.push("preset = ?");
            values.push(Value::Text(preset.clone()));
        }
        if let Some(ref language) = patch.language {
            sets.push("language = ?");
            values.push(opt_text(language));
        }
        if let Some(ref user_language) = patch.user_language {
            sets.push("user_language = ?");
            values.push(Value::Text(user_language.clone()));
        }
        if let Some(ref timezone) = patch.timezone {
            sets.push("timezone = ?");
            values.push(Value::Text(timezone.clone()));
        }
        if let Some(ref system_prompt) = patch.system_prompt {
            sets.push("system_prompt = ?");
            values.push(opt_text(system_prompt));
        }
        if let Some(ref custom) = patch.custom_system_prompt {
            sets.push("custom_system_prompt = ?");
            values.push(opt_text(custom));
        }
        if let Some(index) = patch.predefined_index {
            sets.push("predefined_index = ?");
            values.push(Value::Integer(i64::from(index)));
        }
        if let Some(threshold) = patch.summarize_after {
            sets.push("summarize_after = ?");
            values.push(Value::Integer(i64::from(clamp_summarize_after(threshold))));
        }
        if let Some(active) = patch.active {
            sets.push("active = ?");
            values.push(Value::Integer(i64::from(active)));
            if !active {
                sets.push("next_proactive_at = NULL");
            }
        }

        // Positional placeholders are numbered after the SET list is final.
        let mut position = 0;
        let assignments: Vec<String> = sets
            .iter()
            .map(|clause| {
                if clause.contains('?') {
                    position += 1;
                    clause.replace('?', &format!("?{position}"))
                } else {
                    (*clause).to_owned()
                }
            })
            .collect();
        values.push(Value::Text(id.to_owned()));
        let sql = format!(
            "UPDATE sessions SET {} WHERE id = ?{}",
            assignments.join(", "),
            position + 1
        );

        let conn = self.lock()?;
        let rows = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        Ok(())
    }

    /// Write the next proactive contact time for an active session.
    ///
    /// Inactive sessions are left untouched (returns `false`) so a late
    /// scheduling decision cannot resurrect a paused session.
    pub fn set_next_contact(&self, id: &str, at_epoch_secs: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE sessions SET next_proactive_at = ?2 WHERE id = ?1 AND active = 1",
            params![id, at_epoch_secs],
        )?;
        Ok(rows > 0)
    }

    /// All sessions whose proactive contact time has elapsed.
    ///
    /// Reads committed state directly; no caching between ticks.
    pub fn list_due(&self, now_epoch_secs: i64) -> Result<Vec<Session>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, mode, provider, preset, language, user_language, timezone, \
             system_prompt, custom_system_prompt, predefined_index, summarize_after, \
             active, next_proactive_at FROM sessions \
             WHERE active = 1 AND next_proactive_at IS NOT NULL AND next_proactive_at <= ?1 \
             ORDER BY next_proactive_at",
        )?;
        let rows = stmt.query_map([now_epoch_secs], row_to_session)?;
        collect_rows(rows)
    }

    /// Every session, for reporting.
    pub fn list_all(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(SELECT_ALL_SESSIONS)?;
        let rows = stmt.query_map([], row_to_session)?;
        collect_rows(rows)
    }

    /// History statistics for one session.
    pub fn stats(&self, id: &str) -> Result<SessionStats, StoreError> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM history \
             WHERE session_id = ?1",
            [id],
            |row| {
                Ok(SessionStats {
                    count: row.get(0)?,
                    first: row.get(1)?,
                    last: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // History log
    // -----------------------------------------------------------------------

    /// Append one dialogue turn at the end of the session's sequence.
    pub fn append(&self, id: &str, role: Role, content: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history (session_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![id, role.as_str(), content, now_epoch_secs()],
        )?;
        Ok(())
    }

    /// The most recent `limit` entries in chronological order (oldest first).
    pub fn recent(&self, id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM history \
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![id, limit as i64], row_to_entry)?;
        let mut entries = collect_rows(rows)?;
        entries.reverse();
        Ok(entries)
    }

    /// Delete all history for a session. The session row itself survives.
    pub fn clear_history(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM history WHERE session_id = ?1", [id])?;
        Ok(())
    }

    /// Total history entries for a session.
    pub fn history_count(&self, id: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE session_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Collapse a session's history into one summary entry plus the tail.
    ///
    /// Transactional: the existing entries are deleted and re-created as
    /// `[summary entry, last keep_last entries in original order]` with
    /// their original timestamps, or nothing changes at all. The caller
    /// obtains the summary text first; this method never talks to the LLM.
    pub fn replace_with_summary(
        &self,
        id: &str,
        summary: &str,
        keep_last: usize,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let tail = {
            let mut stmt = tx.prepare(
                "SELECT role, content, created_at FROM history \
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![id, keep_last as i64], row_to_entry)?;
            let mut entries = collect_rows(rows)?;
            entries.reverse();
            entries
        };

        tx.execute("DELETE FROM history WHERE session_id = ?1", [id])?;
        tx.execute(
            "INSERT INTO history (session_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                Role::Assistant.as_str(),
                format!("{SUMMARY_PREFIX}{summary}"),
                now_epoch_secs()
            ],
        )?;
        for entry in &tail {
            tx.execute(
                "INSERT INTO history (session_id, role, content, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, entry.role.as_str(), entry.content, entry.created_at],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Acquire the connection mutex.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

const SELECT_SESSION_BY_ID: &str = "SELECT id, mode, provider, preset, language, user_language, \
     timezone, system_prompt, custom_system_prompt, predefined_index, summarize_after, \
     active, next_proactive_at FROM sessions WHERE id = ?1";

const SELECT_ALL_SESSIONS: &str = "SELECT id, mode, provider, preset, language, user_language, \
     timezone, system_prompt, custom_system_prompt, predefined_index, summarize_after, \
     active, next_proactive_at FROM sessions ORDER BY id";

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let mode_str: String = row.get(1)?;
    let predefined_index: i64 = row.get(9)?;
    let summarize_after: i64 = row.get(10)?;
    Ok(Session {
        id: row.get(0)?,
        // Unknown stored names fall back to the AI mode.
        mode: Mode::parse(&mode_str).unwrap_or(Mode::Ai),
        provider: row.get(2)?,
        preset: row.get(3)?,
        language: row.get(4)?,
        user_language: row.get(5)?,
        timezone: row.get(6)?,
        system_prompt: row.get(7)?,
        custom_system_prompt: row.get(8)?,
        predefined_index: predefined_index.max(0) as u32,
        summarize_after: clamp_summarize_after(summarize_after.max(0) as u32),
        active: row.get::<_, i64>(11)? != 0,
        next_proactive_at: row.get(12)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let role_str: String = row.get(0)?;
    Ok(HistoryEntry {
        role: Role::parse(&role_str),
        content: row.get(1)?,
        created_at: row.get(2)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
