//! Runner configuration stored under `.runner/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::OutputFormat;

/// Runner configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum number of agent invocations running at once.
    pub max_parallel: usize,

    /// Never spawn the agent; tickets complete without side effects.
    pub dry_run: bool,

    /// Refuse to start a run while any dependency is unsatisfiable.
    pub strict_dependencies: bool,

    pub agent: AgentConfig,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable.
    pub command: String,

    /// Arguments placed before the generated ones (e.g. a script path).
    pub args: Vec<String>,

    /// Pass `--force`, allowing the agent to write files.
    pub force: bool,

    pub output_format: OutputFormat,

    /// Per-invocation wall-clock budget in seconds.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "cursor-agent".to_string(),
            args: Vec::new(),
            force: true,
            output_format: OutputFormat::StreamJson,
            timeout_secs: 30 * 60,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for per-invocation agent logs, relative to the project root.
    pub log_dir: Option<PathBuf>,

    /// Skip per-invocation agent logs entirely.
    pub disable_detailed_log: bool,

    /// Log every agent output line at debug level.
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: Some(PathBuf::from(".runner/logs")),
            disable_detailed_log: false,
            verbose: false,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            dry_run: false,
            strict_dependencies: false,
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(anyhow!("max_parallel must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command must not be empty"));
        }
        Ok(())
    }

    /// Log directory resolved against `root`, or `None` when logging is off.
    pub fn resolved_log_dir(&self, root: &Path) -> Option<PathBuf> {
        if self.logging.disable_detailed_log {
            return None;
        }
        self.logging.log_dir.as_ref().map(|dir| root.join(dir))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
