//! gh-agent server: loads config, opens the ledger, wires the agent and
//! serves the HTTP API until ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gha_agent::tools::builtin_registry;
use gha_agent::{AgentService, ChatCompletionsEngine, Dispatcher, ReasoningEngine, UnavailableEngine};
use gha_core::config::Config;
use gha_core::ledger::Ledger;
use gha_integrations::github::GitHubConnector;
use gha_integrations::repo_cache::RepoTreeCache;
use gha_server::{api_router, AppState};
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn load_config() -> Result<Config> {
    let explicit = std::env::var("GHA_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));
    match explicit {
        Some(path) => Config::load_from(&path).with_context(|| format!("failed to load config from {path}")),
        None => Config::load().context("failed to load config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    gha_telemetry::logging::init_from_config("gha-server", &config.logging);

    let ledger_path = config.resolved_ledger_path();
    let ledger = Ledger::open(&ledger_path)
        .await
        .with_context(|| format!("failed to open ledger at {}", ledger_path.display()))?;

    let (engine, engine_initialized): (Arc<dyn ReasoningEngine>, bool) =
        match ChatCompletionsEngine::from_config(&config.engine) {
            Ok(engine) => {
                info!(model = engine.model(), "reasoning engine ready");
                (Arc::new(engine), true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "reasoning engine unavailable; queries will fail");
                (Arc::new(UnavailableEngine::new(e.to_string())), false)
            }
        };

    let dispatcher = Dispatcher::from_config(Arc::new(builtin_registry()), &config.tools);
    let cache = Arc::new(RepoTreeCache::new(config.tools.min_path_similarity));
    let connector = Arc::new(GitHubConnector::new(config.github.api_base.clone()));
    let service = AgentService::new(Arc::new(ledger), connector, engine, dispatcher, cache);

    let state = Arc::new(AppState::new(Arc::new(service), engine_initialized));
    let app = api_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gh-agent API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("ctrl-c received, shutting down");
        })
        .await
        .context("server error")?;

    info!("gh-agent stopped");
    Ok(())
}
