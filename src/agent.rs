//! Reactive message handling and session settings.
//!
//! Everything a user can do from the chat side lands here: sending a
//! message, changing modes and providers, pausing, asking for a progress
//! report. Each settings operation is a column-scoped patch so concurrent
//! scheduler writes are never clobbered.

use std::sync::Arc;

use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{AgentError, Result};
use crate::llm::ProviderRegistry;
use crate::locks::SessionLocks;
use crate::modes::{self, ai, ModeContext};
use crate::preset::PresetLibrary;
use crate::proactive;
use crate::store::{
    clamp_summarize_after, Mode, SessionPatch, SessionStore, StoreError,
};

/// Shown when a reply could not be produced; the real error is logged.
pub const GENERIC_RETRY: &str =
    "Sorry, something went wrong on my side. Please try again in a moment.";

const ASK_LANGUAGE: &str = "Which language would you like to learn?";

/// Snapshot of one session's settings for display.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub mode: Mode,
    pub provider: String,
    pub provider_name: String,
    pub preset: String,
    pub language: Option<String>,
    pub user_language: String,
    pub timezone: String,
    pub has_custom_prompt: bool,
    pub context_limit: u32,
    pub active: bool,
    pub next_contact_at: Option<i64>,
}

/// The reactive side of the engine.
pub struct Agent {
    store: Arc<SessionStore>,
    registry: Arc<ProviderRegistry>,
    presets: Arc<PresetLibrary>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
}

impl Agent {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ProviderRegistry>,
        presets: Arc<PresetLibrary>,
        clock: Arc<dyn Clock>,
        locks: SessionLocks,
    ) -> Self {
        Self {
            store,
            registry,
            presets,
            clock,
            locks,
        }
    }

    fn ctx(&self) -> ModeContext<'_> {
        ModeContext {
            store: &self.store,
            registry: &self.registry,
            presets: &self.presets,
        }
    }

    /// Handle one inbound user message and return the reply text.
    ///
    /// A session without a target language is still bootstrapping: the
    /// first non-empty message becomes the language and the welcome line is
    /// returned without touching history.
    pub async fn handle_message(&self, id: &str, text: &str) -> Result<String> {
        let session = self.store.get_or_create(id)?;

        if session.language.is_none() {
            let language = text.trim();
            if language.is_empty() {
                return Ok(ASK_LANGUAGE.to_owned());
            }
            self.store.patch(
                id,
                &SessionPatch {
                    language: Some(Some(language.to_owned())),
                    ..Default::default()
                },
            )?;
            info!(session = id, language, "session bootstrapped");
            return Ok(format!(
                "Great, let's learn {language}! Send me a message any time \
                 and we'll practice together."
            ));
        }

        let lock = self.locks.for_session(id);
        let _guard = lock.lock().await;

        // Re-read under the lock: the scheduler may have appended turns or
        // evolved the prompt while we waited.
        let session = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;

        let answer = modes::reply(&self.ctx(), &session, text).await?;
        proactive::decide_next(&self.store, &self.registry, &self.clock, &session).await;
        Ok(answer)
    }

    /// [`handle_message`](Self::handle_message) with errors mapped to a
    /// generic retry line for the user.
    pub async fn respond(&self, id: &str, text: &str) -> String {
        match self.handle_message(id, text).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(session = id, error = %e, "message handling failed");
                GENERIC_RETRY.to_owned()
            }
        }
    }

    /// Build a progress report over the session's recent conversation.
    pub async fn progress_report(&self, id: &str) -> Result<String> {
        let session = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        ai::generate_report(&self.ctx(), &session).await
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn set_language(&self, id: &str, language: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                language: Some(Some(language.to_owned())),
                ..Default::default()
            },
        )
    }

    pub fn set_user_language(&self, id: &str, language: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                user_language: Some(language.to_owned()),
                ..Default::default()
            },
        )
    }

    /// Install a custom system prompt that overrides both the preset and
    /// any evolved prompt.
    pub fn set_custom_prompt(&self, id: &str, prompt: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                custom_system_prompt: Some(Some(prompt.to_owned())),
                ..Default::default()
            },
        )
    }

    /// Drop the custom override; the evolved or preset prompt applies again.
    pub fn reset_prompt(&self, id: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                custom_system_prompt: Some(None),
                ..Default::default()
            },
        )
    }

    /// Switch conversation mode. Unknown names are rejected.
    pub fn set_mode(&self, id: &str, input: &str) -> Result<Mode> {
        let mode = Mode::parse(input.trim())
            .ok_or_else(|| AgentError::Config(format!("unknown mode: {input}")))?;
        self.patch_one(
            id,
            SessionPatch {
                mode: Some(mode),
                ..Default::default()
            },
        )?;
        Ok(mode)
    }

    /// Switch provider. Unknown ids are stored as-is; the registry
    /// substitutes the default at invocation time. Returns the display
    /// name actually in effect.
    pub fn set_provider(&self, id: &str, provider: &str) -> Result<String> {
        self.patch_one(
            id,
            SessionPatch {
                provider: Some(provider.to_owned()),
                ..Default::default()
            },
        )?;
        Ok(self.registry.display_name(provider))
    }

    /// Switch persona. The conversation starts over: history is cleared and
    /// the evolved prompt and reply cursor are reset.
    pub fn set_preset(&self, id: &str, preset: &str) -> Result<()> {
        // Surface a broken bundle now rather than on the next reply.
        self.presets.get(preset)?;
        self.patch_one(
            id,
            SessionPatch {
                preset: Some(preset.to_owned()),
                system_prompt: Some(None),
                predefined_index: Some(0),
                ..Default::default()
            },
        )?;
        self.store.clear_history(id)?;
        Ok(())
    }

    /// Set the session timezone, validated against the IANA database.
    /// Invalid names are rejected and the previous value is kept.
    pub fn set_timezone(&self, id: &str, timezone: &str) -> Result<()> {
        let tz: chrono_tz::Tz = timezone
            .trim()
            .parse()
            .map_err(|_| AgentError::Config(format!("unknown timezone: {timezone}")))?;
        self.patch_one(
            id,
            SessionPatch {
                timezone: Some(tz.name().to_owned()),
                ..Default::default()
            },
        )
    }

    /// Set the compaction threshold, clamped to its allowed range.
    /// Returns the effective value.
    pub fn set_context_limit(&self, id: &str, limit: u32) -> Result<u32> {
        let effective = clamp_summarize_after(limit);
        self.patch_one(
            id,
            SessionPatch {
                summarize_after: Some(effective),
                ..Default::default()
            },
        )?;
        Ok(effective)
    }

    /// Stop proactive contact. Also clears any pending schedule.
    pub fn pause(&self, id: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                active: Some(false),
                ..Default::default()
            },
        )
    }

    /// Resume proactive contact and schedule the next check-in.
    pub async fn resume(&self, id: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                active: Some(true),
                ..Default::default()
            },
        )?;
        let session = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        proactive::decide_next(&self.store, &self.registry, &self.clock, &session).await;
        Ok(())
    }

    /// Wipe the conversation: history, evolved prompt and reply cursor.
    /// Settings (mode, provider, languages, timezone) survive.
    pub fn reset(&self, id: &str) -> Result<()> {
        self.patch_one(
            id,
            SessionPatch {
                system_prompt: Some(None),
                predefined_index: Some(0),
                ..Default::default()
            },
        )?;
        self.store.clear_history(id)?;
        Ok(())
    }

    /// Settings snapshot for display.
    pub fn status(&self, id: &str) -> Result<SessionStatus> {
        let session = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        Ok(SessionStatus {
            provider_name: self.registry.display_name(&session.provider),
            mode: session.mode,
            provider: session.provider,
            preset: session.preset,
            language: session.language,
            user_language: session.user_language,
            timezone: session.timezone,
            has_custom_prompt: session.custom_system_prompt.is_some(),
            context_limit: session.summarize_after,
            active: session.active,
            next_contact_at: session.next_proactive_at,
        })
    }

    fn patch_one(&self, id: &str, patch: SessionPatch) -> Result<()> {
        self.store.patch(id, &patch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::llm::ChatClient;
    use crate::test_utils::{scripted_registry, ScriptedClient};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SessionStore>,
        client: Arc<ScriptedClient>,
        agent: Agent,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = Arc::new(SessionStore::open(dir.path()).expect("store"));
        let presets = Arc::new(PresetLibrary::new(dir.path().join("presets")));
        let client = Arc::new(ScriptedClient::fixed("claro!"));
        let registry = Arc::new(scripted_registry(
            Arc::clone(&client) as Arc<dyn ChatClient>
        ));
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let agent = Agent::new(
            Arc::clone(&store),
            registry,
            presets,
            clock,
            SessionLocks::new(),
        );
        Fixture {
            _dir: dir,
            store,
            client,
            agent,
        }
    }

    fn bootstrap(fx: &Fixture, id: &str) {
        fx.store.get_or_create(id).expect("create");
        fx.agent.set_language(id, "Spanish").expect("language");
        fx.agent.set_provider(id, "scripted").expect("provider");
    }

    #[tokio::test]
    async fn first_message_sets_language_without_history() {
        let fx = fixture();

        let welcome = fx.agent.handle_message("42", "Spanish").await.expect("welcome");
        assert!(welcome.contains("Spanish"));

        let session = fx.store.get("42").unwrap().unwrap();
        assert_eq!(session.language.as_deref(), Some("Spanish"));
        assert_eq!(fx.store.history_count("42").expect("count"), 0);
        assert!(fx.client.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_first_message_asks_again() {
        let fx = fixture();
        let reply = fx.agent.handle_message("42", "   ").await.expect("reply");
        assert_eq!(reply, ASK_LANGUAGE);
        assert_eq!(fx.store.get("42").unwrap().unwrap().language, None);
    }

    #[tokio::test]
    async fn second_message_goes_through_the_mode() {
        let fx = fixture();
        bootstrap(&fx, "42");

        let answer = fx.agent.handle_message("42", "hola").await.expect("reply");
        assert_eq!(answer, "claro!");
        assert_eq!(fx.store.history_count("42").expect("count"), 2);
        // The time decision ran and committed a schedule.
        assert!(fx.store.get("42").unwrap().unwrap().next_proactive_at.is_some());
    }

    #[tokio::test]
    async fn respond_maps_errors_to_retry_line() {
        let fx = fixture();
        bootstrap(&fx, "42");
        // Queued outcomes win over the fixed fallback.
        fx.client.push_failure("model offline");

        let line = fx.agent.respond("42", "hola").await;
        assert_eq!(line, GENERIC_RETRY);
    }

    #[test]
    fn invalid_timezone_is_rejected_and_value_kept() {
        let fx = fixture();
        fx.store.get_or_create("s").expect("create");

        let err = fx.agent.set_timezone("s", "Mars/Olympus").expect_err("reject");
        assert!(matches!(err, AgentError::Config(_)));
        assert_eq!(fx.store.get("s").unwrap().unwrap().timezone, "UTC");

        fx.agent.set_timezone("s", "Europe/Madrid").expect("accept");
        assert_eq!(
            fx.store.get("s").unwrap().unwrap().timezone,
            "Europe/Madrid"
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let fx = fixture();
        fx.store.get_or_create("s").expect("create");
        assert!(fx.agent.set_mode("s", "telepathic").is_err());
        assert_eq!(fx.agent.set_mode("s", "predefined").expect("set"), Mode::Predefined);
    }

    #[test]
    fn context_limit_is_clamped() {
        let fx = fixture();
        fx.store.get_or_create("s").expect("create");
        assert_eq!(fx.agent.set_context_limit("s", 3).expect("low"), 6);
        assert_eq!(fx.agent.set_context_limit("s", 50).expect("mid"), 50);
        assert_eq!(fx.agent.set_context_limit("s", 1000).expect("high"), 100);
    }

    #[test]
    fn preset_switch_starts_over() {
        let fx = fixture();
        fx.store.get_or_create("s").expect("create");
        fx.store
            .append("s", crate::store::Role::User, "old talk")
            .expect("append");
        fx.store
            .patch(
                "s",
                &SessionPatch {
                    system_prompt: Some(Some("evolved".to_owned())),
                    predefined_index: Some(5),
                    ..Default::default()
                },
            )
            .expect("seed");

        fx.agent.set_preset("s", "language-tutor").expect("switch");

        let session = fx.store.get("s").unwrap().unwrap();
        assert_eq!(session.system_prompt, None);
        assert_eq!(session.predefined_index, 0);
        assert_eq!(fx.store.history_count("s").expect("count"), 0);
    }

    #[tokio::test]
    async fn pause_and_resume_drive_the_schedule() {
        let fx = fixture();
        bootstrap(&fx, "s");
        fx.store.set_next_contact("s", 999_999).expect("schedule");

        fx.agent.pause("s").expect("pause");
        let paused = fx.store.get("s").unwrap().unwrap();
        assert!(!paused.active);
        assert_eq!(paused.next_proactive_at, None);

        fx.client.push_reply("2026-03-01T15:00:00Z");
        fx.agent.resume("s").await.expect("resume");
        let resumed = fx.store.get("s").unwrap().unwrap();
        assert!(resumed.active);
        assert!(resumed.next_proactive_at.is_some());
    }

    #[tokio::test]
    async fn reset_wipes_conversation_but_keeps_settings() {
        let fx = fixture();
        bootstrap(&fx, "s");
        fx.agent.handle_message("s", "hola").await.expect("reply");
        fx.agent.set_custom_prompt("s", "be strict").expect("custom");

        fx.agent.reset("s").expect("reset");

        let session = fx.store.get("s").unwrap().unwrap();
        assert_eq!(fx.store.history_count("s").expect("count"), 0);
        assert_eq!(session.system_prompt, None);
        assert_eq!(session.language.as_deref(), Some("Spanish"));
        // The custom override is a setting and survives reset.
        assert!(session.custom_system_prompt.is_some());
    }

    #[test]
    fn status_reflects_the_row() {
        let fx = fixture();
        fx.store.get_or_create("s").expect("create");
        fx.agent.set_provider("s", "scripted").expect("provider");

        let status = fx.agent.status("s").expect("status");
        assert_eq!(status.mode, Mode::Ai);
        assert_eq!(status.provider, "scripted");
        assert_eq!(status.provider_name, "Scripted");
        assert!(!status.has_custom_prompt);
        assert_eq!(status.context_limit, 20);
        assert!(status.active);
    }
}
