//! Configuration types and loading for sessync.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;
use crate::models::AgentKind;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the sessync database.
    pub database: PathBuf,

    /// Host label stamped on every synced session.
    pub machine: String,

    /// Agent session roots to discover and watch.
    pub agents: Vec<AgentRootConfig>,

    /// Sync engine tuning.
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        Self {
            database: data_dir.join("sessions.db"),
            machine: default_machine(),
            agents: default_agents(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file, falling back to
    /// defaults (plus environment overrides) when it does not exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::build(None)
        }
    }

    /// Load configuration from a specific file.
    ///
    /// Values from `SESSYNC_*` environment variables override the file; nested
    /// keys use a double underscore (`SESSYNC_SYNC__INTERVAL_SECS=60`).
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!("config file {}", path.display())));
        }
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(&crate::env_prefix())
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
            Ok(config)
        }
    }

    /// Expand a path, replacing ~ and environment variables.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
        for agent in &mut self.agents {
            agent.path = Self::expand_path(&agent.path)
                .to_string_lossy()
                .to_string();
        }
    }

    /// Enabled `(agent, root)` pairs, in configuration order.
    pub fn resolved_roots(&self) -> Vec<(AgentKind, PathBuf)> {
        self.agents
            .iter()
            .filter(|agent| agent.enabled)
            .map(|agent| (agent.kind, Self::expand_path(&agent.path)))
            .collect()
    }

    /// Check whether any enabled root is configured for the given agent.
    pub fn agent_enabled(&self, kind: AgentKind) -> bool {
        self.agents
            .iter()
            .any(|agent| agent.kind == kind && agent.enabled)
    }
}

/// One agent's session root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRootConfig {
    /// Which parser handles files under this root.
    pub kind: AgentKind,

    /// Root directory of the agent's session logs.
    pub path: String,

    /// Whether this root takes part in sync passes.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic full-sync interval in seconds (fallback when watch events are missed).
    pub interval_secs: u64,

    /// Quiet period before a changed path is reported by the watcher.
    pub debounce_ms: u64,

    /// Parser worker count; 0 picks a value from the available parallelism.
    pub workers: usize,

    /// Whether to watch agent roots for changes.
    pub watch: bool,

    /// Whether to keep non-interactive `codex exec` sessions.
    pub include_codex_exec: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            debounce_ms: 500,
            workers: 0,
            watch: true,
            include_codex_exec: false,
        }
    }
}

impl SyncConfig {
    /// Effective worker count, bounded to 2..=8 when picked automatically.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2)
            .clamp(2, 8)
    }
}

fn default_agents() -> Vec<AgentRootConfig> {
    [
        (AgentKind::Claude, "~/.claude/projects"),
        (AgentKind::Codex, "~/.codex/sessions"),
        (AgentKind::Gemini, "~/.gemini"),
        (AgentKind::Copilot, "~/.copilot"),
        (AgentKind::Pi, "~/.pi/agent/sessions"),
        (AgentKind::Amp, "~/.local/share/amp/threads"),
        (AgentKind::Iflow, "~/.iflow/projects"),
    ]
    .into_iter()
    .map(|(kind, path)| AgentRootConfig {
        kind,
        path: path.to_string(),
        enabled: true,
    })
    .collect()
}

fn default_machine() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
