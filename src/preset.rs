//! Preset bundles: the persona a session speaks with.
//!
//! A preset bundle carries the AI system prompt, the proactive instruction,
//! and the scripted material used by predefined mode. Bundles load from
//! `{preset_dir}/{name}.json` and are cached per name; a missing file falls
//! back to the built-in tutor bundle so a fresh install works with zero
//! files on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

/// Name of the built-in bundle used when nothing else is configured.
pub const DEFAULT_PRESET: &str = "language-tutor";

/// One persona bundle.
///
/// Fields omitted from a bundle file stay empty; the built-in tutor is used
/// only when no file exists for a name at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    /// System prompt for AI mode. May contain a `{language}` placeholder.
    #[serde(default)]
    pub system_prompt: String,
    /// Instruction appended when generating a proactive message.
    #[serde(default)]
    pub proactive_prompt: Option<String>,
    /// Scripted replies cycled through in predefined mode.
    #[serde(default)]
    pub replies: Vec<String>,
    /// Scripted proactive messages picked at random in predefined mode.
    #[serde(default)]
    pub proactive_messages: Vec<String>,
}

fn built_in_tutor() -> Preset {
    Preset {
        system_prompt: "You are a friendly, patient language tutor helping the user \
                        practice {language}. Keep replies short and conversational, \
                        correct mistakes gently, and ask a follow-up question to keep \
                        the dialogue going."
            .to_owned(),
        proactive_prompt: Some(
            "Start a new conversation with the user on your own initiative. Pick a \
             light everyday topic suited to their level and open with a short \
             question in {language}."
                .to_owned(),
        ),
        replies: Vec::new(),
        proactive_messages: Vec::new(),
    }
}

/// Strip anything that could escape the preset directory.
///
/// Keeps alphanumerics, `-` and `_`; everything else is dropped. An empty
/// result maps to the default preset name.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        DEFAULT_PRESET.to_owned()
    } else {
        cleaned
    }
}

/// Loads and caches preset bundles from a directory.
pub struct PresetLibrary {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Preset>>>,
}

impl PresetLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the bundle for `name`, loading it from disk on first use.
    ///
    /// A missing file yields the built-in tutor bundle; a file that exists
    /// but does not parse is an error so a broken bundle is noticed rather
    /// than silently masked.
    pub fn get(&self, name: &str) -> Result<Arc<Preset>> {
        let name = sanitize_name(name);
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AgentError::Config("preset cache lock poisoned".to_owned()))?;
        if let Some(existing) = cache.get(&name) {
            return Ok(Arc::clone(existing));
        }

        let path = self.dir.join(format!("{name}.json"));
        let preset = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                AgentError::Config(format!("invalid preset {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(preset = name.as_str(), "no bundle file, using built-in");
                built_in_tutor()
            }
            Err(e) => {
                warn!(preset = name.as_str(), error = %e, "cannot read preset file");
                return Err(AgentError::Io(e));
            }
        };

        let preset = Arc::new(preset);
        cache.insert(name, Arc::clone(&preset));
        Ok(preset)
    }
}
