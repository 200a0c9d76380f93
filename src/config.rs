//! Configuration types for the lingo engine.
//!
//! Everything environment-specific (storage paths, provider definitions,
//! scheduler cadence) is injected through [`AgentConfig`] rather than
//! hard-coded. Provider credentials are env-var references resolved at
//! client construction time and never stored in the config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

/// Fallback provider id substituted for unknown values.
pub const DEFAULT_PROVIDER: &str = "auto-free";

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Storage paths.
    pub storage: StorageConfig,
    /// LLM provider definitions and invocation limits.
    pub llm: LlmConfig,
    /// Proactive scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Session id of the admin conversation, if any.
    pub admin_session: Option<String>,
}

/// Storage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the SQLite database.
    pub root_dir: PathBuf,
    /// Directory holding preset bundle JSON files.
    pub preset_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lingo");
        Self {
            preset_dir: base.join("presets"),
            root_dir: base,
        }
    }
}

/// LLM provider definitions and invocation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider id used when a session names an unknown one.
    pub default_provider: String,
    /// Upper bound on any single provider round trip, in seconds.
    ///
    /// A timeout counts as a provider error for fallback purposes.
    pub request_timeout_secs: u64,
    /// Available providers, tried by id.
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER.to_owned(),
            request_timeout_secs: 60,
            providers: default_providers(),
        }
    }
}

/// One named backend LLM configuration.
///
/// All providers speak the OpenAI chat completions protocol; the base URL
/// points at the compatible endpoint for each vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry id (e.g. `"auto-free"`).
    pub id: String,
    /// Human-readable name for status displays.
    pub name: String,
    /// Model identifier sent to the API.
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "auto-free".to_owned(),
            name: "Auto Free (OpenRouter)".to_owned(),
            model: "openrouter/free".to_owned(),
            base_url: OPENROUTER_URL.to_owned(),
            api_key_env: "OPENROUTER_API_KEY".to_owned(),
        },
        ProviderConfig {
            id: "deepseek-r1".to_owned(),
            name: "DeepSeek R1 (free)".to_owned(),
            model: "deepseek/deepseek-r1-0528:free".to_owned(),
            base_url: OPENROUTER_URL.to_owned(),
            api_key_env: "OPENROUTER_API_KEY".to_owned(),
        },
        ProviderConfig {
            id: "llama-70b".to_owned(),
            name: "Llama 3.3 70B (free)".to_owned(),
            model: "meta-llama/llama-3.3-70b-instruct:free".to_owned(),
            base_url: OPENROUTER_URL.to_owned(),
            api_key_env: "OPENROUTER_API_KEY".to_owned(),
        },
        ProviderConfig {
            id: "gemini".to_owned(),
            name: "Gemini Flash (free)".to_owned(),
            model: "gemini-2.0-flash-lite".to_owned(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_owned(),
            api_key_env: "GEMINI_API_KEY".to_owned(),
        },
        ProviderConfig {
            id: "groq".to_owned(),
            name: "Llama 70B via Groq (free)".to_owned(),
            model: "llama-3.3-70b-versatile".to_owned(),
            base_url: "https://api.groq.com/openai/v1".to_owned(),
            api_key_env: "GROQ_API_KEY".to_owned(),
        },
        ProviderConfig {
            id: "openai".to_owned(),
            name: "GPT-4o Mini (paid)".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
        },
    ]
}

/// Proactive scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Poll interval in seconds.
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 60 }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|e| AgentError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Write configuration to a TOML file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| AgentError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Default path for the config file.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lingo")
            .join("config.toml")
    }
}
