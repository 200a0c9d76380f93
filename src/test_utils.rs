//! Scripted fakes shared by unit and integration tests.
//!
//! Kept as a regular module so integration tests under `tests/` can use
//! the same fakes as the in-file unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::{AgentError, Result};
use crate::llm::{ChatClient, ChatMessage, ProviderRegistry};
use crate::transport::Transport;

enum Outcome {
    Reply(String),
    Failure(String),
}

/// A [`ChatClient`] that replays a script and records every invocation.
///
/// Queued outcomes are consumed first; once the queue is empty the fixed
/// fallback reply (if any) is returned, otherwise the call fails.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedClient {
    /// A client with an empty script: every call fails until outcomes are
    /// pushed.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that always answers `text` once the script is exhausted.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(text.into()),
            ..Self::new()
        }
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Outcome::Reply(text.into()));
    }

    /// Queue a failed invocation.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Outcome::Failure(message.into()));
    }

    /// Every message list this client has been invoked with, in order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Outcome::Reply(text)) => Ok(text),
            Some(Outcome::Failure(message)) => Err(AgentError::Llm(message)),
            None => match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => Err(AgentError::Llm("script exhausted".to_owned())),
            },
        }
    }
}

/// A registry with a single provider id `"scripted"` backed by `client`.
pub fn scripted_registry(client: Arc<dyn ChatClient>) -> ProviderRegistry {
    let config = LlmConfig {
        default_provider: "scripted".to_owned(),
        request_timeout_secs: 5,
        providers: vec![ProviderConfig {
            id: "scripted".to_owned(),
            name: "Scripted".to_owned(),
            model: "scripted".to_owned(),
            base_url: "http://unused.invalid".to_owned(),
            api_key_env: "UNUSED".to_owned(),
        }],
    };
    ProviderRegistry::new(&config, Box::new(move |_| Ok(Arc::clone(&client))))
        .expect("scripted registry")
}

/// A [`Transport`] that records sends and can be told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `send` fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All `(session_id, text)` pairs delivered so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, session_id: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::Transport("delivery refused".to_owned()));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((session_id.to_owned(), text.to_owned()));
        Ok(())
    }
}
