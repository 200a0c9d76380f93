//! Proactive contact scheduler.
//!
//! A fixed-cadence loop polls the store for due sessions and dispatches a
//! proactive message to each, one at a time. A failing session is pushed
//! back an hour and the batch carries on; one broken provider cannot stall
//! everyone else's check-ins.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::llm::ProviderRegistry;
use crate::locks::SessionLocks;
use crate::modes::{self, ModeContext};
use crate::preset::PresetLibrary;
use crate::proactive;
use crate::store::{Session, SessionStore};
use crate::transport::Transport;

/// Pushback applied to a session whose dispatch failed.
pub const RETRY_DELAY_SECS: i64 = 60 * 60;

/// The proactive dispatch loop.
pub struct ProactiveScheduler {
    store: Arc<SessionStore>,
    registry: Arc<ProviderRegistry>,
    presets: Arc<PresetLibrary>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
    tick: Duration,
}

impl ProactiveScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ProviderRegistry>,
        presets: Arc<PresetLibrary>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        locks: SessionLocks,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            presets,
            transport,
            clock,
            locks,
            tick,
        }
    }

    /// Run until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(tick_secs = self.tick.as_secs(), "proactive scheduler started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("proactive scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }

    /// One polling pass over all due sessions.
    pub async fn tick_once(&self) {
        let now = self.clock.now_epoch_secs();
        let due = match self.store.list_due(now) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "cannot poll due sessions");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "due sessions");

        for session in due {
            let lock = self.locks.for_session(&session.id);
            let _guard = lock.lock().await;

            // The handler may have acted on the session while we waited for
            // its lock; re-read committed state and re-check dueness.
            let fresh = match self.store.get(&session.id) {
                Ok(Some(fresh)) => fresh,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session = session.id.as_str(), error = %e, "cannot re-read session");
                    continue;
                }
            };
            if !fresh.active || !fresh.next_proactive_at.is_some_and(|at| at <= now) {
                continue;
            }

            if let Err(e) = self.dispatch(&fresh).await {
                warn!(session = fresh.id.as_str(), error = %e, "proactive dispatch failed");
                let retry_at = self.clock.now_epoch_secs() + RETRY_DELAY_SECS;
                if let Err(e) = self.store.set_next_contact(&fresh.id, retry_at) {
                    warn!(session = fresh.id.as_str(), error = %e, "cannot push back schedule");
                }
            }
        }
    }

    /// Generate, deliver, and reschedule one session's check-in.
    async fn dispatch(&self, session: &Session) -> Result<()> {
        let ctx = ModeContext {
            store: &self.store,
            registry: &self.registry,
            presets: &self.presets,
        };

        // No content means no contact happened; the session keeps its
        // schedule instead of being pushed out by a fresh time decision.
        if let Some(text) = modes::proactive(&ctx, session).await? {
            self.transport.send(&session.id, &text).await?;
            info!(session = session.id.as_str(), "proactive message delivered");
            proactive::decide_next(&self.store, &self.registry, &self.clock, session).await;
        } else {
            debug!(session = session.id.as_str(), "mode produced no opener");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::llm::ChatClient;
    use crate::store::{Mode, SessionPatch};
    use crate::test_utils::{scripted_registry, RecordingTransport, ScriptedClient};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<SessionStore>,
        client: Arc<ScriptedClient>,
        transport: Arc<RecordingTransport>,
        clock: Arc<ManualClock>,
        scheduler: ProactiveScheduler,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = Arc::new(SessionStore::open(dir.path()).expect("store"));
        let presets = Arc::new(PresetLibrary::new(dir.path().join("presets")));
        let client = Arc::new(ScriptedClient::new());
        let registry = Arc::new(scripted_registry(
            Arc::clone(&client) as Arc<dyn ChatClient>
        ));
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let scheduler = ProactiveScheduler::new(
            Arc::clone(&store),
            registry,
            presets,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            SessionLocks::new(),
            Duration::from_secs(60),
        );
        Fixture {
            _dir: dir,
            store,
            client,
            transport,
            clock,
            scheduler,
        }
    }

    fn due_session(fx: &Fixture, id: &str, at_offset: i64) {
        fx.store.get_or_create(id).expect("create");
        fx.store
            .patch(
                id,
                &SessionPatch {
                    provider: Some("scripted".to_owned()),
                    language: Some(Some("Spanish".to_owned())),
                    ..Default::default()
                },
            )
            .expect("patch");
        fx.store
            .set_next_contact(id, fx.clock.now_epoch_secs() + at_offset)
            .expect("schedule");
    }

    #[tokio::test]
    async fn due_session_gets_message_and_reschedule() {
        let fx = fixture();
        due_session(&fx, "s", -10);
        fx.client.push_reply("hola, ready to practice?");
        fx.client.push_reply("whenever"); // unparseable time preference

        fx.scheduler.tick_once().await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "s");
        assert_eq!(sent[0].1, "hola, ready to practice?");

        let session = fx.store.get("s").unwrap().unwrap();
        let next = session.next_proactive_at.expect("rescheduled");
        assert_eq!(
            next,
            fx.clock.now_epoch_secs() + crate::proactive::MIN_LEAD_SECS
        );
        // The opener is in history.
        assert_eq!(fx.store.history_count("s").expect("count"), 1);
    }

    #[tokio::test]
    async fn not_yet_due_sessions_are_skipped() {
        let fx = fixture();
        due_session(&fx, "s", 600);

        fx.scheduler.tick_once().await;
        assert!(fx.transport.sent().is_empty());
        assert!(fx.client.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_session_is_pushed_back_and_batch_continues() {
        let fx = fixture();
        due_session(&fx, "bad", -100);
        due_session(&fx, "good", -50);

        // "bad" is polled first (earlier deadline): its opener fails.
        fx.client.push_failure("model offline");
        // "good": opener, then time preference.
        fx.client.push_reply("hey!");
        fx.client.push_reply("2026-03-01T16:00:00Z");

        fx.scheduler.tick_once().await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "good");

        let bad = fx.store.get("bad").unwrap().unwrap();
        assert_eq!(
            bad.next_proactive_at,
            Some(fx.clock.now_epoch_secs() + RETRY_DELAY_SECS)
        );
        let good = fx.store.get("good").unwrap().unwrap();
        assert_eq!(
            good.next_proactive_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 16, 0, 0).unwrap().timestamp())
        );
    }

    #[tokio::test]
    async fn delivery_failure_is_isolated_too() {
        let fx = fixture();
        due_session(&fx, "s", -10);
        fx.client.push_reply("hola");
        fx.transport.set_fail(true);

        fx.scheduler.tick_once().await;

        let session = fx.store.get("s").unwrap().unwrap();
        assert_eq!(
            session.next_proactive_at,
            Some(fx.clock.now_epoch_secs() + RETRY_DELAY_SECS)
        );
    }

    #[tokio::test]
    async fn predefined_session_sends_scripted_opener() {
        let fx = fixture();
        due_session(&fx, "s", -10);
        fx.store
            .patch(
                "s",
                &SessionPatch {
                    mode: Some(Mode::Predefined),
                    preset: Some("drills".to_owned()),
                    ..Default::default()
                },
            )
            .expect("patch");
        std::fs::create_dir_all(fx.store.root().join("presets")).expect("mkdir");
        std::fs::write(
            fx.store.root().join("presets/drills.json"),
            r#"{"system_prompt": "x", "proactive_messages": ["time to drill!"]}"#,
        )
        .expect("write preset");
        // Only the time decision talks to the model.
        fx.client.push_reply("2026-03-01T18:00:00Z");

        fx.scheduler.tick_once().await;

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "time to drill!");
        assert_eq!(fx.store.history_count("s").expect("count"), 1);
    }

    #[tokio::test]
    async fn empty_scripted_opener_list_keeps_the_schedule() {
        let fx = fixture();
        due_session(&fx, "s", -10);
        fx.store
            .patch(
                "s",
                &SessionPatch {
                    mode: Some(Mode::Predefined),
                    preset: Some("quiet".to_owned()),
                    ..Default::default()
                },
            )
            .expect("patch");
        std::fs::create_dir_all(fx.store.root().join("presets")).expect("mkdir");
        std::fs::write(
            fx.store.root().join("presets/quiet.json"),
            r#"{"system_prompt": "x"}"#,
        )
        .expect("write preset");
        let before = fx.store.get("s").unwrap().unwrap().next_proactive_at;

        fx.scheduler.tick_once().await;

        // Nothing sent, nothing asked of the model, schedule untouched.
        assert!(fx.transport.sent().is_empty());
        assert!(fx.client.calls().is_empty());
        assert_eq!(fx.store.get("s").unwrap().unwrap().next_proactive_at, before);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let fx = fixture();
        let cancel = CancellationToken::new();
        let handle = {
            let token = cancel.clone();
            let scheduler = fx.scheduler;
            tokio::spawn(async move { scheduler.run(token).await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("run returns promptly")
            .expect("task completes");
    }
}
