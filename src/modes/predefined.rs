//! Scripted mode: deterministic replies, random proactive openers.

use rand::seq::SliceRandom;

use crate::preset::Preset;

/// Shown when a scripted persona has no replies configured.
const EMPTY_BUNDLE_REPLY: &str =
    "This persona has no scripted replies configured. Switch back to AI mode \
     or pick another persona.";

/// Select the scripted reply for the session's current cursor.
///
/// The cursor wraps over the bundle, so the sequence repeats indefinitely.
pub fn reply(preset: &Preset, index: u32) -> String {
    if preset.replies.is_empty() {
        return EMPTY_BUNDLE_REPLY.to_owned();
    }
    let slot = index as usize % preset.replies.len();
    preset.replies[slot].clone()
}

/// Pick a uniformly random scripted opener, or `None` with nothing to say.
pub fn proactive(preset: &Preset) -> Option<String> {
    preset
        .proactive_messages
        .choose(&mut rand::thread_rng())
        .cloned()
}
