//! Coordinator server wiring
//!
//! Connects the state store, seeds the backlog, spawns the merge worker and
//! reaper, and serves the HTTP API with graceful shutdown.

pub mod config;

use crate::api::{api_router, ApiState};
use anyhow::{Context, Result};
use config::AppConfig;
use phalanx_core::store::keys;
use phalanx_core::{backlog, Coordinator, Reaper, RedisStore, ShutdownController, StateStore};
use phalanx_merge::MergeCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Run the coordinator server until interrupted.
pub async fn run(config_path: Option<String>) -> Result<()> {
    let app_config = config::load_config(config_path.as_deref())?;
    info!("configuration loaded");

    let store: Arc<dyn StateStore> = Arc::new(
        RedisStore::new(&app_config.redis.url).context("invalid Redis URL")?,
    );
    store
        .ping()
        .await
        .context("state store unreachable; is Redis running?")?;
    info!(url = %app_config.redis.url, "state store connected");

    initialize_backlog(&app_config, store.as_ref()).await?;

    let orchestrator_config = app_config.orchestrator();
    // Config snapshot for operators inspecting the store directly.
    store
        .set(
            keys::CONFIG,
            &serde_json::to_string(&orchestrator_config)?,
        )
        .await
        .context("failed to store config snapshot")?;

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        orchestrator_config.clone(),
    ));
    let reaper = Arc::new(Reaper::new(
        store.clone(),
        orchestrator_config.timeouts.clone(),
    ));
    let shutdown = ShutdownController::new();

    let merge_worker = Arc::new(MergeCoordinator::new(
        store.clone(),
        orchestrator_config,
        &app_config.project_root,
    ));
    {
        let worker = merge_worker.clone();
        let token = shutdown.token();
        tokio::spawn(async move { worker.run(token).await });
    }
    {
        let reaper = reaper.clone();
        let token = shutdown.token();
        tokio::spawn(async move { reaper.run(token).await });
    }
    info!("merge worker and reaper started");

    let app = api_router(ApiState {
        coordinator,
        reaper,
        store,
    });

    let addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server address")?;
    info!("coordinator API listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server error")?;

    shutdown.shutdown();
    info!("coordinator shutdown complete");
    Ok(())
}

async fn initialize_backlog(app_config: &AppConfig, store: &dyn StateStore) -> Result<()> {
    let yaml = std::fs::read_to_string(&app_config.backlog_path)
        .with_context(|| format!("failed to read backlog: {}", app_config.backlog_path))?;
    let (tasks, phases) = backlog::initialize(store, &yaml)
        .await
        .context("backlog initialization failed")?;
    info!(tasks, phases, "backlog ready");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, then fan shutdown out to the workers.
async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received terminate signal, shutting down"),
    }
    controller.shutdown();
}
