//! Pagegen — landing-page generation service
//!
//! Single-binary Rust service that:
//! 1. Builds the API-key pool, limiter, and serializer from configuration
//! 2. Accepts keyword requests and runs the generation workflow
//!    (title/article/FAQ copy → products → render → publish)
//! 3. Serves task progress, history, health, and metrics on the app port
//! 4. Serves key-pool administration on a separate admin port

mod admin;
mod config;
mod error;
mod history;
mod metrics;
mod products;
mod publish;
mod render;
mod routes;
mod tasks;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genai_client::GenAiClient;
use genai_pool::{CallSerializer, CredentialPool, Orchestrator, ThroughputLimiter};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::history::History;
use crate::products::ProductClient;
use crate::publish::CmsClient;
use crate::routes::{AppState, build_router};
use crate::tasks::TaskStore;
use crate::workflow::PageGenerator;

/// How long to wait for in-flight requests after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting pagegen");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        provider = %config.provider.base_url,
        model = %config.provider.model,
        "configuration loaded"
    );

    // Key pool from environment — fatal when nothing valid is configured
    let (raw_keys, priority) = config::keys_from_env().context("reading API keys")?;
    let pool = Arc::new(
        CredentialPool::new(raw_keys, priority).context("building key pool")?,
    );

    // Core components are constructed once here and shared by reference;
    // nothing else in the process may create its own instances.
    let limiter = Arc::new(ThroughputLimiter::new(config.limits.to_limiter_config()));
    let serializer = Arc::new(CallSerializer::new());
    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        limiter.clone(),
        serializer.clone(),
        config.retry.to_retry_policy(),
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.provider.timeout_secs))
        .build()
        .context("building HTTP client")?;

    let tasks = Arc::new(TaskStore::new());
    let history = Arc::new(
        History::load(config.history.path.clone(), config.history.capacity)
            .await
            .context("loading history")?,
    );

    let generator = Arc::new(PageGenerator::new(
        orchestrator,
        GenAiClient::new(http.clone(), &config.provider.base_url, &config.provider.model),
        ProductClient::new(http.clone(), &config.products.base_url),
        CmsClient::new(http, &config.cms.base_url, config.cms.token.clone()),
        tasks.clone(),
        history.clone(),
        config.products.limit,
    ));

    let app_state = AppState {
        generator,
        tasks,
        history,
        pool: pool.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.server.max_connections);

    let admin_state = AdminState::new(pool, limiter, serializer);
    let admin_app = build_admin_router(admin_state);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.admin_addr))?;

    info!(addr = %config.server.listen_addr, "app listener ready");
    info!(addr = %config.server.admin_addr, "admin listener ready");

    // The admin listener lives for the process lifetime; it has no
    // in-flight work worth draining.
    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_app).await {
            error!(error = %e, "admin server error");
        }
    });

    // Graceful shutdown: stop accepting, then drain in-flight requests up
    // to DRAIN_TIMEOUT so a slow CMS call cannot block process exit.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => {
            tracing::warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
