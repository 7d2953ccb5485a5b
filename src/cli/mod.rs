//! CLI for phalanx
//!
//! - `serve`: run the coordinator (default)
//! - `agent`: run an agent runtime against a coordinator
//! - `status`: print orchestrator status
//! - `cleanup`: trigger a manual reaper sweep

use clap::{Parser, Subcommand};

/// Phalanx multi-agent task orchestrator
#[derive(Parser, Debug)]
#[command(name = "phalanx")]
#[command(about = "Multi-agent task orchestration over a shared mainline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator server (default)
    Serve {
        /// Explicit config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Run an agent runtime
    Agent {
        /// Coordinator base URL
        #[arg(long, default_value = "http://127.0.0.1:8765")]
        coordinator_url: String,
        /// Working tree for this agent
        #[arg(long, default_value = ".")]
        project_root: String,
        /// Redis URL for notification channels
        #[arg(long, default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
        /// Preferred agent id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Capability tags (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Print orchestrator status
    Status {
        /// Coordinator base URL
        #[arg(long, default_value = "http://127.0.0.1:8765")]
        coordinator_url: String,
        /// Output raw JSON (for scripting)
        #[arg(long)]
        json: bool,
    },
    /// Trigger a manual cleanup sweep
    Cleanup {
        /// Coordinator base URL
        #[arg(long, default_value = "http://127.0.0.1:8765")]
        coordinator_url: String,
    },
}
