//! Outbound delivery contract.
//!
//! The engine never talks to a chat platform directly; it hands finished
//! text to a [`Transport`]. Production deployments implement this against
//! their messaging layer, tests use a recording fake, and the bundled
//! [`LogTransport`] makes the binary runnable without any platform wired
//! up.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

/// Delivers engine output to the user behind a session id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `text` to the conversation identified by `session_id`.
    async fn send(&self, session_id: &str, text: &str) -> Result<()>;
}

/// Transport that logs instead of delivering. Used when no platform is
/// attached.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, session_id: &str, text: &str) -> Result<()> {
        info!(session = session_id, text, "outbound message");
        Ok(())
    }
}
