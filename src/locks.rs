//! Per-session mutual exclusion.
//!
//! The reactive handler and the scheduler can both act on the same session;
//! holding that session's lock around read-act-write sequences keeps their
//! interleavings sane without serializing unrelated sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Map of session id to its async lock. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for one session.
    pub fn for_session(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            // A poisoned map only means another thread panicked while
            // inserting; the data is still usable.
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            map.entry(id.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
