//! Proactive contact time decision.
//!
//! The model is asked when it would next reach out; whatever happens, a
//! bounded, sane instant ends up committed to the store. This module never
//! returns an error: every failure path degrades to a fixed delay.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::llm::{ChatMessage, ProviderRegistry};
use crate::store::{HistoryEntry, Role, Session, SessionStore};

/// The committed time is never sooner than this far ahead.
pub const MIN_LEAD_SECS: i64 = 30 * 60;

/// Delay committed when the whole round trip fails.
pub const FALLBACK_DELAY_SECS: i64 = 180 * 60;

/// How many trailing entries inform the decision.
const DECISION_WINDOW: usize = 10;

/// Decide and durably commit when to next contact this session.
///
/// Three outcomes, all committed through `set_next_contact`:
/// - model answered with a parseable instant: `max(answer, now + 30 min)`;
/// - model answered garbage (no preference): `now + 30 min`;
/// - the round trip itself failed: `now + 180 min`.
///
/// Returns the committed epoch seconds. A store write failure is logged at
/// error level; the session simply keeps its previous schedule.
pub async fn decide_next(
    store: &SessionStore,
    registry: &ProviderRegistry,
    clock: &Arc<dyn Clock>,
    session: &Session,
) -> i64 {
    let now = clock.now();
    let min_bound = now.timestamp() + MIN_LEAD_SECS;

    let target = match ask_model(store, registry, session, now).await {
        Ok(answer) => match parse_instant(&answer) {
            Some(at) => at.max(min_bound),
            None => {
                debug!(
                    session = session.id.as_str(),
                    answer = answer.as_str(),
                    "unparseable time preference, using minimum lead"
                );
                min_bound
            }
        },
        Err(e) => {
            warn!(session = session.id.as_str(), error = %e, "time decision failed");
            now.timestamp() + FALLBACK_DELAY_SECS
        }
    };

    match store.set_next_contact(&session.id, target) {
        Ok(true) => {}
        Ok(false) => debug!(
            session = session.id.as_str(),
            "session inactive, schedule not written"
        ),
        Err(e) => error!(session = session.id.as_str(), error = %e, "cannot persist schedule"),
    }
    target
}

async fn ask_model(
    store: &SessionStore,
    registry: &ProviderRegistry,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<String> {
    let client = registry.client(&session.provider)?;
    let window = store.recent(&session.id, DECISION_WINDOW)?;

    let instruction = format!(
        "You schedule the next proactive check-in of a language tutor. The \
         current time is {} (UTC) and the user's timezone is {}. Based on the \
         recent conversation, pick a good moment for the next check-in, at \
         least half an hour from now. Answer with a single ISO-8601 datetime \
         and nothing else.",
        now.to_rfc3339(),
        session.timezone,
    );
    let mut messages = vec![ChatMessage::system(instruction)];
    messages.push(ChatMessage::user(render_window(&window)));

    client.invoke(&messages).await
}

fn render_window(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "(no conversation yet)".to_owned();
    }
    entries
        .iter()
        .map(|e| {
            let who = match e.role {
                Role::User => "User",
                Role::Assistant => "Tutor",
            };
            format!("{who}: {}", e.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a model answer into epoch seconds.
///
/// Accepts RFC 3339 with offset, a bare `YYYY-MM-DDTHH:MM[:SS]` treated as
/// UTC, or a date alone treated as midnight UTC. Anything else is no
/// preference.
fn parse_instant(text: &str) -> Option<i64> {
    let trimmed = text.trim().trim_matches(|c| c == '`' || c == '"');
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(at.timestamp());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN).and_utc().timestamp());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::SessionPatch;
    use crate::test_utils::{scripted_registry, ScriptedClient};
    use crate::llm::ChatClient;
    use chrono::TimeZone;

    fn fixture() -> (
        tempfile::TempDir,
        SessionStore,
        Arc<ScriptedClient>,
        ProviderRegistry,
        Arc<dyn Clock>,
    ) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = SessionStore::open(dir.path()).expect("store");
        let client = Arc::new(ScriptedClient::new());
        let registry = scripted_registry(Arc::clone(&client) as Arc<dyn ChatClient>);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        (dir, store, client, registry, clock)
    }

    fn scripted_session(store: &SessionStore, id: &str) -> Session {
        store.get_or_create(id).expect("create");
        store
            .patch(
                id,
                &SessionPatch {
                    provider: Some("scripted".to_owned()),
                    ..Default::default()
                },
            )
            .expect("patch");
        store.get(id).expect("get").expect("exists")
    }

    #[tokio::test]
    async fn future_preference_is_committed() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        client.push_reply("2026-03-01T15:00:00Z");

        let at = decide_next(&store, &registry, &clock, &session).await;
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap().timestamp();
        assert_eq!(at, expected);
        assert_eq!(store.get("s").unwrap().unwrap().next_proactive_at, Some(at));
    }

    #[tokio::test]
    async fn past_preference_is_raised_to_minimum_lead() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        client.push_reply("2026-03-01T11:00:00Z");

        let at = decide_next(&store, &registry, &clock, &session).await;
        assert_eq!(at, clock.now_epoch_secs() + MIN_LEAD_SECS);
    }

    #[tokio::test]
    async fn garbage_preference_means_minimum_lead() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        client.push_reply("tomorrow sounds nice");

        let at = decide_next(&store, &registry, &clock, &session).await;
        assert_eq!(at, clock.now_epoch_secs() + MIN_LEAD_SECS);
    }

    #[tokio::test]
    async fn round_trip_failure_means_fallback_delay() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        client.push_failure("model offline");

        let at = decide_next(&store, &registry, &clock, &session).await;
        assert_eq!(at, clock.now_epoch_secs() + FALLBACK_DELAY_SECS);
        assert_eq!(store.get("s").unwrap().unwrap().next_proactive_at, Some(at));
    }

    #[tokio::test]
    async fn inactive_session_keeps_no_schedule() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        store
            .patch(
                "s",
                &SessionPatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .expect("pause");
        client.push_reply("2026-03-01T15:00:00Z");

        decide_next(&store, &registry, &clock, &session).await;
        assert_eq!(store.get("s").unwrap().unwrap().next_proactive_at, None);
    }

    #[test]
    fn parse_accepts_common_shapes() {
        assert!(parse_instant("2026-03-01T15:00:00Z").is_some());
        assert!(parse_instant("2026-03-01T15:00:00+02:00").is_some());
        assert!(parse_instant("2026-03-01T15:00").is_some());
        assert!(parse_instant("  `2026-03-01T15:00:00`  ").is_some());
        assert!(parse_instant("no idea").is_none());
        assert!(parse_instant("").is_none());
    }

    #[test]
    fn parse_treats_bare_dates_as_midnight_utc() {
        let at = parse_instant("2026-03-05").expect("date only");
        assert_eq!(
            at,
            Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap().timestamp()
        );
    }

    #[tokio::test]
    async fn date_only_preference_counts_as_a_real_preference() {
        let (_dir, store, client, registry, clock) = fixture();
        let session = scripted_session(&store, "s");
        client.push_reply("2026-03-05");

        let at = decide_next(&store, &registry, &clock, &session).await;
        assert_eq!(
            at,
            Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap().timestamp()
        );
    }
}
