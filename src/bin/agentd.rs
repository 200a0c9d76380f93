//! Engine daemon: runs the proactive scheduler until interrupted.
//!
//! A chat platform integration would construct [`lingo::Agent`] with the
//! same collaborators and feed inbound messages into it; without one, the
//! daemon still schedules and logs proactive check-ins.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lingo::config::AgentConfig;
use lingo::llm::ChatClient;
use lingo::{
    Clock, LogTransport, OpenAiClient, PresetLibrary, ProactiveScheduler, ProviderRegistry,
    SessionLocks, SessionStore, SystemClock, Transport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AgentConfig::default_config_path);
    let config = if config_path.exists() {
        AgentConfig::load_from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        AgentConfig::default()
    };

    let store = Arc::new(
        SessionStore::open(&config.storage.root_dir)
            .with_context(|| format!("opening store in {}", config.storage.root_dir.display()))?,
    );
    info!(root = %store.root().display(), "session store ready");

    let timeout = Duration::from_secs(config.llm.request_timeout_secs);
    let registry = Arc::new(
        ProviderRegistry::new(
            &config.llm,
            Box::new(move |spec| {
                Ok(Arc::new(OpenAiClient::new(spec, timeout)?) as Arc<dyn ChatClient>)
            }),
        )
        .context("building provider registry")?,
    );
    let presets = Arc::new(PresetLibrary::new(config.storage.preset_dir.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport: Arc<dyn Transport> = Arc::new(LogTransport);
    let locks = SessionLocks::new();

    let scheduler = ProactiveScheduler::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&presets),
        transport,
        clock,
        locks,
        Duration::from_secs(config.scheduler.tick_secs),
    );

    let cancel = CancellationToken::new();
    let runner = {
        let token = cancel.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();
    runner.await.context("joining scheduler task")?;
    Ok(())
}
