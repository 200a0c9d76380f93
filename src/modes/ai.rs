//! AI mode: model-backed replies, prompt evolution and history compaction.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::llm::{ChatClient, ChatMessage};
use crate::preset::Preset;
use crate::store::{HistoryEntry, Role, Session, SessionPatch, SUMMARY_PREFIX};

use super::{fill, ModeContext, NO_MARKUP_SUFFIX};

/// Upper bound on the history window sent with a reply.
///
/// Compaction keeps retained history below twice the largest threshold, so
/// this reads the whole retained conversation.
const HISTORY_WINDOW: usize = 2 * crate::store::SUMMARIZE_AFTER_MAX as usize;

/// How many trailing entries accompany a proactive request.
const PROACTIVE_WINDOW: usize = 10;

/// Original entries preserved verbatim after compaction.
const KEEP_RECENT: usize = 4;

/// How many trailing entries a progress report reviews.
const REPORT_WINDOW: usize = 100;

/// Below this many entries a report is not worth generating.
const REPORT_MIN_ENTRIES: usize = 4;

const REPORT_TOO_EARLY: &str =
    "There is not enough conversation yet for a progress report. Keep \
     practicing and ask again later!";

/// Effective system prompt for a session.
///
/// Precedence: the user's custom override, then the evolved prompt, then
/// the preset default. The `{language}` placeholder is substituted and the
/// plain-text instruction appended last so it survives every source.
pub fn system_prompt(session: &Session, preset: &Preset) -> String {
    let base = session
        .custom_system_prompt
        .as_deref()
        .or(session.system_prompt.as_deref())
        .unwrap_or(&preset.system_prompt);
    let mut prompt = fill(base, session.language.as_deref());
    prompt.push_str(NO_MARKUP_SUFFIX);
    prompt
}

fn history_to_messages(entries: &[HistoryEntry]) -> Vec<ChatMessage> {
    entries
        .iter()
        .map(|e| match e.role {
            Role::User => ChatMessage::user(e.content.clone()),
            Role::Assistant => ChatMessage::assistant(e.content.clone()),
        })
        .collect()
}

/// Respond to an inbound user message.
///
/// Appends the user turn, invokes the model over the retained window,
/// appends the assistant turn, then runs the periodic maintenance pass
/// (prompt evolution and compaction) when the post-reply entry count lands
/// on a multiple of the session's threshold.
pub async fn reply(ctx: &ModeContext<'_>, session: &Session, text: &str) -> Result<String> {
    let client = ctx.registry.client(&session.provider)?;
    let preset = ctx.presets.get(&session.preset)?;

    ctx.store.append(&session.id, Role::User, text)?;

    let window = ctx.store.recent(&session.id, HISTORY_WINDOW)?;
    let mut messages = vec![ChatMessage::system(system_prompt(session, &preset))];
    messages.extend(history_to_messages(&window));

    let answer = client.invoke(&messages).await?;
    ctx.store.append(&session.id, Role::Assistant, &answer)?;

    let count = ctx.store.history_count(&session.id)?;
    let threshold = u64::from(session.summarize_after);
    if count > 0 && count % threshold == 0 {
        maintain(ctx, session, client.as_ref(), &preset).await;
    }

    Ok(answer)
}

/// Generate a proactive opener and record it as an assistant turn.
pub async fn proactive(ctx: &ModeContext<'_>, session: &Session) -> Result<String> {
    let client = ctx.registry.client(&session.provider)?;
    let preset = ctx.presets.get(&session.preset)?;

    let instruction = preset.proactive_prompt.as_deref().unwrap_or(
        "Start a new conversation with the user on your own initiative. Open \
         with a short friendly message in {language}.",
    );
    let mut prompt = system_prompt(session, &preset);
    prompt.push_str("\n\n");
    prompt.push_str(&fill(instruction, session.language.as_deref()));

    let window = ctx.store.recent(&session.id, PROACTIVE_WINDOW)?;
    let mut messages = vec![ChatMessage::system(prompt)];
    messages.extend(history_to_messages(&window));
    messages.push(ChatMessage::user(
        "Write your proactive opener now.".to_owned(),
    ));

    let opener = client.invoke(&messages).await?;
    ctx.store.append(&session.id, Role::Assistant, &opener)?;
    Ok(opener)
}

/// Build a textual progress report over the recent conversation.
pub async fn generate_report(ctx: &ModeContext<'_>, session: &Session) -> Result<String> {
    let entries = ctx.store.recent(&session.id, REPORT_WINDOW)?;
    if entries.len() < REPORT_MIN_ENTRIES {
        return Ok(REPORT_TOO_EARLY.to_owned());
    }

    let language = session
        .language
        .as_deref()
        .unwrap_or("their target language");
    let analyst = format!(
        "You are a language-learning analyst. Review the following tutoring \
         conversation and write a short progress report for a learner of \
         {language}: strengths, recurring mistakes, and one concrete thing to \
         practice next. Address the learner directly in {user_language}.\
         {NO_MARKUP_SUFFIX}",
        user_language = session.user_language,
    );
    let transcript = render_transcript(&entries);

    let client = ctx.registry.client(&session.provider)?;
    client
        .invoke(&[ChatMessage::system(analyst), ChatMessage::user(transcript)])
        .await
}

/// Periodic maintenance at the compaction threshold.
///
/// Runs prompt evolution first (so the evolved prompt can draw on the full
/// window), then compaction. Either step failing is logged and skipped;
/// neither surfaces to the user.
async fn maintain(
    ctx: &ModeContext<'_>,
    session: &Session,
    client: &dyn ChatClient,
    preset: &Preset,
) {
    if let Err(e) = evolve_prompt(ctx, session, client, preset).await {
        warn!(session = session.id.as_str(), error = %e, "prompt evolution skipped");
    }
    if let Err(e) = compact(ctx, session, client).await {
        warn!(session = session.id.as_str(), error = %e, "history compaction skipped");
    }
}

/// Refine the session's system prompt from the recent conversation.
async fn evolve_prompt(
    ctx: &ModeContext<'_>,
    session: &Session,
    client: &dyn ChatClient,
    preset: &Preset,
) -> Result<()> {
    let current = session
        .custom_system_prompt
        .as_deref()
        .or(session.system_prompt.as_deref())
        .unwrap_or(&preset.system_prompt);
    let window = ctx
        .store
        .recent(&session.id, usize::try_from(session.summarize_after).unwrap_or(HISTORY_WINDOW))?;

    let instruction = "You maintain the system prompt of a language tutor. Given the \
         current prompt and the recent conversation, produce an improved \
         prompt: keep the persona and the {language} placeholder, fold in \
         what you learned about the user's level, interests and recurring \
         mistakes. Output only the new prompt text.";
    let request = format!(
        "Current prompt:\n{current}\n\nRecent conversation:\n{}",
        render_transcript(&window)
    );

    let evolved = client
        .invoke(&[
            ChatMessage::system(instruction.to_owned()),
            ChatMessage::user(request),
        ])
        .await?;

    ctx.store.patch(
        &session.id,
        &SessionPatch {
            system_prompt: Some(Some(evolved)),
            ..Default::default()
        },
    )?;
    info!(session = session.id.as_str(), "system prompt evolved");
    Ok(())
}

/// Summarize the retained history and collapse it around the summary.
///
/// The replacement deletes everything, so the summary request must cover
/// the whole retained history, not just the latest threshold window: a
/// previously skipped compaction leaves older entries (including an
/// earlier summary) that would otherwise be dropped unsummarized.
async fn compact(ctx: &ModeContext<'_>, session: &Session, client: &dyn ChatClient) -> Result<()> {
    let window = ctx.store.recent(&session.id, HISTORY_WINDOW)?;
    let request = format!(
        "Summarize this language-practice conversation in a few sentences. \
         Record the topics covered, the learner's level, and anything worth \
         remembering for the next session.\n\n{}",
        render_transcript(&window)
    );

    let summary = client
        .invoke(&[ChatMessage::user(request)])
        .await?;
    ctx.store
        .replace_with_summary(&session.id, &summary, KEEP_RECENT)?;
    debug!(
        session = session.id.as_str(),
        kept = KEEP_RECENT,
        "history compacted"
    );
    Ok(())
}

fn render_transcript(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let who = match e.role {
                Role::User => "User",
                Role::Assistant => {
                    if e.content.starts_with(SUMMARY_PREFIX) {
                        "Context"
                    } else {
                        "Tutor"
                    }
                }
            };
            format!("{who}: {}", e.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
