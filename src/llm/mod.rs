//! LLM client abstraction and provider plumbing.
//!
//! Every backend speaks through [`ChatClient`]: an ordered message list in,
//! plain text out. The registry hands out process-lifetime client instances
//! keyed by provider id.

pub mod api;
pub mod registry;

use async_trait::async_trait;

use crate::error::Result;

pub use api::OpenAiClient;
pub use registry::ProviderRegistry;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Wire name used by the chat completions protocol.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// An opaque model invocation capability.
///
/// Implementations may fail or time out; a timeout is reported as the same
/// error kind as any other invocation failure so callers have a single
/// fallback path.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send the ordered message list and return the model's text reply.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String>;
}
