//! Conversation mode strategies.
//!
//! A session is either AI-driven or scripted; the dispatch is a closed
//! match over [`Mode`], so adding a mode means adding a variant and the
//! compiler points at every site that must handle it.
//!
//! History bookkeeping is owned here: after either `reply` or `proactive`
//! returns text, the store already reflects the new turns. Callers only
//! deliver the content.

pub mod ai;
pub mod predefined;

use std::sync::Arc;

use crate::error::Result;
use crate::llm::ProviderRegistry;
use crate::preset::{Preset, PresetLibrary};
use crate::store::{Mode, Role, Session, SessionPatch, SessionStore};

/// Suffix appended to every system prompt sent to a model.
///
/// The delivery channel renders plain text, so markup in the reply would
/// reach the user verbatim.
pub const NO_MARKUP_SUFFIX: &str =
    "\n\nIMPORTANT: Answer in plain text only. Never use Markdown, asterisks, \
     bullet points or any other markup.";

/// Shared collaborators every mode needs.
pub struct ModeContext<'a> {
    pub store: &'a SessionStore,
    pub registry: &'a ProviderRegistry,
    pub presets: &'a PresetLibrary,
}

impl ModeContext<'_> {
    fn preset(&self, session: &Session) -> Result<Arc<Preset>> {
        self.presets.get(&session.preset)
    }
}

/// Substitute the `{language}` placeholder in a prompt template.
///
/// An unset target language falls back to a generic phrase so prompts stay
/// grammatical before bootstrap completes.
pub fn fill(template: &str, language: Option<&str>) -> String {
    template.replace(
        "{language}",
        language.unwrap_or("the language the user is learning"),
    )
}

/// Produce a reply to an inbound user message.
///
/// Both modes leave the user and assistant turns in history before
/// returning; predefined mode additionally advances its reply cursor.
pub async fn reply(ctx: &ModeContext<'_>, session: &Session, text: &str) -> Result<String> {
    match session.mode {
        Mode::Ai => ai::reply(ctx, session, text).await,
        Mode::Predefined => {
            let preset = ctx.preset(session)?;
            let scripted = predefined::reply(&preset, session.predefined_index);
            ctx.store.append(&session.id, Role::User, text)?;
            ctx.store.append(&session.id, Role::Assistant, &scripted)?;
            ctx.store.patch(
                &session.id,
                &SessionPatch {
                    predefined_index: Some(session.predefined_index.wrapping_add(1)),
                    ..Default::default()
                },
            )?;
            Ok(scripted)
        }
    }
}

/// Produce a proactive opener, or `None` when the mode has nothing to say.
///
/// Any returned text is already recorded as an assistant turn.
pub async fn proactive(ctx: &ModeContext<'_>, session: &Session) -> Result<Option<String>> {
    match session.mode {
        Mode::Ai => ai::proactive(ctx, session).await.map(Some),
        Mode::Predefined => {
            let preset = ctx.preset(session)?;
            match predefined::proactive(&preset) {
                Some(text) => {
                    ctx.store.append(&session.id, Role::Assistant, &text)?;
                    Ok(Some(text))
                }
                None => Ok(None),
            }
        }
    }
}
