//! Validation helpers for `.runner/` layout, config and tickets.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::graph::DependencyIssue;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::init::RunnerPaths;
use crate::io::ticket_store::load_graph;

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub config: RunnerConfig,
    pub ticket_count: usize,
    /// Dependencies that can never be satisfied. Empty when the store is
    /// fully runnable.
    pub issues: Vec<DependencyIssue>,
}

/// Validate `.runner/` layout, config, ticket store and dependencies.
///
/// Structural problems are errors; dependency issues are reported in the
/// outcome so callers can decide how strict to be.
pub fn validate_runner(root: &Path) -> Result<ValidateOutcome> {
    let paths = RunnerPaths::new(root);

    ensure_dir(&paths.runner_dir)?;
    ensure_file(&paths.tickets_path)?;
    ensure_file(&paths.config_path)?;
    ensure_gitignore(&paths.gitignore_path)?;

    let config = load_config(&paths.config_path).with_context(|| "load config.toml")?;
    let graph = load_graph(&paths.tickets_path).with_context(|| "load tickets.json")?;

    Ok(ValidateOutcome {
        config,
        ticket_count: graph.len(),
        issues: graph.issues(),
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for required in ["logs/", "outputs/"] {
        if !contents.lines().any(|line| line.trim() == required) {
            return Err(anyhow!("missing '{}' in {}", required, path.display()));
        }
    }
    Ok(())
}
