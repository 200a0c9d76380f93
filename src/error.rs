//! Error types for the lingo engine.

use crate::store::StoreError;

/// Top-level error type for the session/scheduling engine.
///
/// Each variant corresponds to one failure kind handled by the engine;
/// callers match on the variant to pick the recovery path (fallback
/// reschedule, generic retry message, validation message).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Provider client construction error (missing credential, bad config).
    #[error("provider error: {0}")]
    Provider(String),

    /// LLM invocation error, including timeouts.
    #[error("LLM error: {0}")]
    Llm(String),

    /// The model returned a non-ISO datetime for the time decision.
    ///
    /// Folded into the min-bound logic inside the time decision; never
    /// crosses a public boundary.
    #[error("time parse error: {0}")]
    TimeParse(String),

    /// Invalid configuration value (malformed timezone, unknown mode).
    #[error("config error: {0}")]
    Config(String),

    /// Session store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Message delivery failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Scheduler dispatch error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
