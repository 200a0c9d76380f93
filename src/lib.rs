//! lingo: session and scheduling engine for a proactive language tutor.
//!
//! The engine keeps one persistent session per user (SQLite), routes
//! inbound messages through a conversation mode (model-backed or
//! scripted), lets the model itself decide when to reach out next, and
//! runs a scheduler loop that delivers those proactive check-ins through a
//! pluggable transport.

pub mod agent;
pub mod clock;
pub mod config;
pub mod error;
pub mod llm;
pub mod locks;
pub mod modes;
pub mod preset;
pub mod proactive;
pub mod scheduler;
pub mod store;
pub mod test_utils;
pub mod transport;

pub use agent::{Agent, SessionStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use llm::{ChatClient, ChatMessage, ChatRole, OpenAiClient, ProviderRegistry};
pub use locks::SessionLocks;
pub use preset::{Preset, PresetLibrary};
pub use scheduler::ProactiveScheduler;
pub use store::{HistoryEntry, Mode, Role, Session, SessionStore, StoreError};
pub use transport::{LogTransport, Transport};
