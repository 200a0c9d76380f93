//! Provider registry with lazy, identity-stable client construction.
//!
//! Clients are built on first request and cached for the life of the
//! process, so repeated lookups of the same provider id return the same
//! instance. Construction failures are not cached; a later request retries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::{AgentError, Result};

use super::ChatClient;

/// Builds a [`ChatClient`] from a provider definition.
///
/// Injected so tests can substitute scripted clients without touching the
/// network.
pub type ClientFactory = dyn Fn(&ProviderConfig) -> Result<Arc<dyn ChatClient>> + Send + Sync;

/// Lazily-constructed, process-lifetime cache of chat clients keyed by
/// provider id.
pub struct ProviderRegistry {
    specs: HashMap<String, ProviderConfig>,
    default_id: String,
    factory: Box<ClientFactory>,
    clients: Mutex<HashMap<String, Arc<dyn ChatClient>>>,
}

impl ProviderRegistry {
    /// Build a registry over the configured providers.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] when the provider list is empty or
    /// the configured default id is not in it.
    pub fn new(config: &LlmConfig, factory: Box<ClientFactory>) -> Result<Self> {
        if config.providers.is_empty() {
            return Err(AgentError::Config("no providers configured".to_owned()));
        }
        let specs: HashMap<String, ProviderConfig> = config
            .providers
            .iter()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        if !specs.contains_key(&config.default_provider) {
            return Err(AgentError::Config(format!(
                "default provider '{}' is not in the provider list",
                config.default_provider
            )));
        }
        Ok(Self {
            specs,
            default_id: config.default_provider.clone(),
            factory,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a provider id, substituting the default for unknown ids.
    fn resolve(&self, id: &str) -> &ProviderConfig {
        match self.specs.get(id) {
            Some(spec) => spec,
            None => {
                warn!(
                    requested = id,
                    fallback = self.default_id.as_str(),
                    "unknown provider id, using default"
                );
                &self.specs[&self.default_id]
            }
        }
    }

    /// Get the client for `id`, constructing it if this is the first use.
    ///
    /// Unknown ids resolve to the default provider. The cache lock is held
    /// across construction so the same client is never built twice.
    ///
    /// # Errors
    ///
    /// Propagates construction failures (e.g. a missing credential) without
    /// caching them; the same id can succeed later once the environment is
    /// fixed.
    pub fn client(&self, id: &str) -> Result<Arc<dyn ChatClient>> {
        let spec = self.resolve(id);
        let mut cache = self
            .clients
            .lock()
            .map_err(|_| AgentError::Provider("provider cache lock poisoned".to_owned()))?;
        if let Some(existing) = cache.get(&spec.id) {
            return Ok(Arc::clone(existing));
        }
        debug!(provider = spec.id.as_str(), "constructing chat client");
        let built = (self.factory)(spec)?;
        cache.insert(spec.id.clone(), Arc::clone(&built));
        Ok(built)
    }

    /// Human-readable name for a provider id, falling back to the id itself
    /// for unknown providers.
    pub fn display_name(&self, id: &str) -> String {
        self.specs
            .get(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_owned())
    }

    /// Whether `id` names a configured provider.
    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// All configured provider ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.keys().cloned().collect();
        ids.sort();
        ids
    }
}
