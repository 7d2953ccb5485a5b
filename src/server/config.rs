//! Server configuration
//!
//! Layered from `config/default.toml`, an optional `config/local.toml`, an
//! explicit `--config` file and `PHALANX__`-prefixed environment variables.
//! Every field has a default so the server can start with no config file at
//! all (local single-host mode).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use phalanx_core::config::{
    AdvancedConfig, AgentAssignmentConfig, GitConfig, OrchestratorConfig, QualityGatesConfig,
    TimeoutsConfig,
};
use serde::{Deserialize, Serialize};

/// HTTP server options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// State store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server options
    #[serde(default)]
    pub server: ServerConfig,
    /// State store options
    #[serde(default)]
    pub redis: RedisConfig,
    /// Path to the backlog YAML
    #[serde(default = "default_backlog_path")]
    pub backlog_path: String,
    /// Working tree shared with the merge worker
    #[serde(default = "default_project_root")]
    pub project_root: String,
    /// Git workflow options
    #[serde(default)]
    pub git: GitConfig,
    /// Quality gate options
    #[serde(default)]
    pub quality_gates: QualityGatesConfig,
    /// Timeouts and intervals
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Advanced tuning
    #[serde(default)]
    pub advanced: AdvancedConfig,
    /// Per-kind claim gating
    #[serde(default)]
    pub agent_assignment: AgentAssignmentConfig,
}

fn default_backlog_path() -> String {
    "backlog.yaml".to_string()
}

fn default_project_root() -> String {
    ".".to_string()
}

impl AppConfig {
    /// The orchestrator config slice shared with agents and the merge
    /// worker.
    #[must_use]
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            git: self.git.clone(),
            quality_gates: self.quality_gates.clone(),
            timeouts: self.timeouts.clone(),
            advanced: self.advanced.clone(),
            agent_assignment: self.agent_assignment.clone(),
        }
    }
}

/// Load configuration from files and environment.
pub fn load_config(explicit_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false));

    if let Some(path) = explicit_path {
        builder = builder.add_source(File::with_name(path).required(true));
    }

    let config = builder
        .add_source(
            Environment::with_prefix("PHALANX")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to build configuration")?;

    config
        .try_deserialize()
        .context("failed to deserialize configuration")
}
