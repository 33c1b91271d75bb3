//! Initialization helpers for `.runner/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{RunnerConfig, write_config};
use super::ticket_store::write_tickets;

/// All canonical paths within `.runner/` for a project root.
#[derive(Debug, Clone)]
pub struct RunnerPaths {
    pub root: PathBuf,
    pub runner_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub tickets_path: PathBuf,
    pub config_path: PathBuf,
    pub outputs_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl RunnerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runner_dir = root.join(".runner");
        Self {
            root: root.clone(),
            runner_dir: runner_dir.clone(),
            gitignore_path: runner_dir.join(".gitignore"),
            tickets_path: runner_dir.join("tickets.json"),
            config_path: runner_dir.join("config.toml"),
            outputs_dir: runner_dir.join("outputs"),
            logs_dir: runner_dir.join("logs"),
        }
    }

    /// Where the agent is told to write its report for `ticket_id`.
    pub fn output_path(&self, ticket_id: &str) -> PathBuf {
        self.outputs_dir.join(format!("{ticket_id}.json"))
    }
}

/// Options for `init_runner`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing runner-owned files.
    pub force: bool,
}

/// Create `.runner/` scaffolding in `root`.
///
/// Fails if `.runner/` already exists unless `options.force` is set.
pub fn init_runner(root: &Path, options: &InitOptions) -> Result<RunnerPaths> {
    let paths = RunnerPaths::new(root);
    if paths.runner_dir.exists() && !options.force {
        return Err(anyhow!(
            "runner init: .runner already exists (use --force to overwrite)"
        ));
    }
    if paths.runner_dir.exists() && !paths.runner_dir.is_dir() {
        return Err(anyhow!(
            "runner init: .runner exists but is not a directory"
        ));
    }

    create_dir(&paths.runner_dir)?;
    create_dir(&paths.outputs_dir)?;
    create_dir(&paths.logs_dir)?;

    fs::write(&paths.gitignore_path, RUNNER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &RunnerConfig::default())?;
    write_tickets(&paths.tickets_path, &[])?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const RUNNER_GITIGNORE: &str = "logs/\noutputs/\n";
