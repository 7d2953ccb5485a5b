//! Phalanx - multi-agent task orchestrator
//!
//! Dispatches a DAG of work items to concurrent agents over HTTP + Redis,
//! supervises each agent's git-based execution and serializes integration
//! into a shared mainline. One binary hosts both roles: the coordinator
//! (`serve`) and the agent runtime (`agent`).

#![forbid(unsafe_code)]

mod api;
mod cli;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use phalanx_agent::{AgentRuntime, CoordinatorClient};
use phalanx_core::{RedisStore, ShutdownController, StateStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phalanx=info,phalanx_core=info,phalanx_merge=info,phalanx_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve { config: None }) => server::run(None).await,
        Some(Commands::Serve { config }) => server::run(config).await,
        Some(Commands::Agent {
            coordinator_url,
            project_root,
            redis_url,
            id,
            capabilities,
        }) => run_agent(coordinator_url, project_root, redis_url, id, capabilities).await,
        Some(Commands::Status {
            coordinator_url,
            json,
        }) => print_status(&coordinator_url, json).await,
        Some(Commands::Cleanup { coordinator_url }) => run_cleanup(&coordinator_url).await,
    }
}

async fn run_agent(
    coordinator_url: String,
    project_root: String,
    redis_url: String,
    preferred_id: Option<String>,
    capabilities: Vec<String>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting agent runtime");

    let store: Arc<dyn StateStore> =
        Arc::new(RedisStore::new(&redis_url).context("invalid Redis URL")?);
    let runtime = AgentRuntime::connect(
        &coordinator_url,
        store,
        &project_root,
        capabilities,
        preferred_id,
    )
    .await
    .context("failed to register with coordinator")?;
    info!(agent_id = %runtime.agent_id(), "agent connected");

    let shutdown = ShutdownController::new();
    {
        let controller = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, stopping agent");
                controller.shutdown();
            }
        });
    }

    runtime
        .run(shutdown.token())
        .await
        .context("agent runtime failed")
}

async fn print_status(coordinator_url: &str, json: bool) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url)?;
    let status = client.status().await.context("status request failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let stats = &status.stats;
    match &status.current_phase {
        Some(phase) => println!(
            "Phase {}/{} ({}): {} tasks",
            phase.index,
            stats.total_phases,
            phase.name,
            phase.tasks.len()
        ),
        None => println!("All {} phases complete", stats.total_phases),
    }
    println!(
        "Tasks: {} total | {} pending, {} in progress, {} done, {} merged, {} failed, {} blocked",
        stats.total_tasks,
        stats.pending_tasks,
        stats.in_progress_tasks,
        stats.done_tasks,
        stats.merged_tasks,
        stats.failed_tasks,
        stats.blocked_tasks,
    );
    println!(
        "Agents: {} total ({} working, {} idle) | merge queue depth: {}",
        stats.total_agents, stats.active_agents, stats.idle_agents, stats.merge_queue_depth,
    );
    for (agent_id, agent) in &status.agents {
        let task = agent.current_task.as_deref().unwrap_or("-");
        println!(
            "  {agent_id}: {:?} on {task} ({} completed, {} failed)",
            agent.state, agent.tasks_completed, agent.tasks_failed,
        );
    }
    Ok(())
}

async fn run_cleanup(coordinator_url: &str) -> Result<()> {
    let client = CoordinatorClient::new(coordinator_url)?;
    let result = client.cleanup().await.context("cleanup request failed")?;
    println!("Recovered {} task(s)", result.recovered);
    Ok(())
}
