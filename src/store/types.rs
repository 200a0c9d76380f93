//! Core session and history types shared across the store and strategies.

use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix carried by the synthetic history entry a compaction leaves behind.
pub const SUMMARY_PREFIX: &str = "[Summary of earlier conversation] ";

/// Reply-generation strategy for a session.
///
/// A closed set: adding a mode means adding a variant here and handling it
/// in the strategy dispatch, checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// LLM-driven replies and proactive messages.
    Ai,
    /// Scripted replies from the session's preset bundle.
    Predefined,
}

impl Mode {
    /// Stable on-disk / wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Predefined => "predefined",
        }
    }

    /// Parse a mode name. Returns `None` for unknown input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(Self::Ai),
            "predefined" => Some(Self::Predefined),
            _ => None,
        }
    }
}

/// Who produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::Assistant,
        }
    }
}

/// Persisted per-conversation state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque conversation id (string-typed to tolerate large numeric ids).
    pub id: String,
    /// Reply-generation strategy.
    pub mode: Mode,
    /// Provider id resolved through the registry.
    pub provider: String,
    /// Named content bundle id.
    pub preset: String,
    /// Target learning subject; unset until the first message sets it.
    pub language: Option<String>,
    /// The user's own language.
    pub user_language: String,
    /// IANA timezone name.
    pub timezone: String,
    /// LLM-evolved system prompt.
    pub system_prompt: Option<String>,
    /// User-set prompt override; wins over the evolved prompt.
    pub custom_system_prompt: Option<String>,
    /// Cursor into the preset's scripted replies, wraps by modulo.
    pub predefined_index: u32,
    /// History length threshold that triggers compaction; clamped to [6,100].
    pub summarize_after: u32,
    /// Whether proactive messaging is enabled.
    pub active: bool,
    /// Epoch seconds of the next proactive contact; non-null only when active.
    pub next_proactive_at: Option<i64>,
}

/// One dialogue turn belonging to a session, ordered by insertion.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    /// Epoch seconds.
    pub created_at: i64,
}

impl HistoryEntry {
    /// Whether this entry is a compaction pseudo-turn.
    pub fn is_summary(&self) -> bool {
        self.role == Role::Assistant && self.content.starts_with(SUMMARY_PREFIX)
    }
}

/// Column-scoped partial update for a session row.
///
/// `None` leaves a column untouched. Nullable columns use a double
/// `Option`: `Some(None)` clears the column, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub mode: Option<Mode>,
    pub provider: Option<String>,
    pub preset: Option<String>,
    pub language: Option<Option<String>>,
    pub user_language: Option<String>,
    pub timezone: Option<String>,
    pub system_prompt: Option<Option<String>>,
    pub custom_system_prompt: Option<Option<String>>,
    pub predefined_index: Option<u32>,
    pub summarize_after: Option<u32>,
    pub active: Option<bool>,
}

impl SessionPatch {
    /// `true` when no column would change.
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.provider.is_none()
            && self.preset.is_none()
            && self.language.is_none()
            && self.user_language.is_none()
            && self.timezone.is_none()
            && self.system_prompt.is_none()
            && self.custom_system_prompt.is_none()
            && self.predefined_index.is_none()
            && self.summarize_after.is_none()
            && self.active.is_none()
    }
}

/// Aggregate history statistics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Total history entries.
    pub count: u64,
    /// Epoch seconds of the oldest entry, if any.
    pub first: Option<i64>,
    /// Epoch seconds of the newest entry, if any.
    pub last: Option<i64>,
}

/// Lower bound for the compaction threshold.
pub const SUMMARIZE_AFTER_MIN: u32 = 6;

/// Upper bound for the compaction threshold.
pub const SUMMARIZE_AFTER_MAX: u32 = 100;

/// Clamp a requested compaction threshold into the allowed range.
pub fn clamp_summarize_after(value: u32) -> u32 {
    value.clamp(SUMMARIZE_AFTER_MIN, SUMMARIZE_AFTER_MAX)
}

/// Returns current UTC seconds since epoch.
pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
