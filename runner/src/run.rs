//! Orchestration for `ticket-runner run` and `ticket-runner retry`.
//!
//! Loads config and tickets, wires the agent executor into the scheduler and
//! persists the ticket store after every status change.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::cancel::CancelToken;
use crate::exit_codes;
use crate::io::caller::Caller;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::executor::{AgentExecutor, TicketExecutor};
use crate::io::init::RunnerPaths;
use crate::io::ticket_store::{load_graph, write_graph};
use crate::scheduler::{RunStop, RunSummary, Scheduler, SchedulerConfig};

/// CLI overrides applied on top of `.runner/config.toml`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_parallel: Option<usize>,
    pub dry_run: bool,
    /// Log each agent output line and mirror agent output to stderr.
    pub verbose: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut RunnerConfig) {
        if let Some(max_parallel) = self.max_parallel {
            config.max_parallel = max_parallel;
        }
        config.dry_run |= self.dry_run;
        config.logging.verbose |= self.verbose;
    }
}

/// Run every runnable ticket under `root` with the configured agent.
pub fn run_from_root(root: &Path, options: &RunOptions, cancel: CancelToken) -> Result<RunSummary> {
    let paths = RunnerPaths::new(root);
    let mut config = load_config(&paths.config_path).with_context(|| "load config.toml")?;
    options.apply(&mut config);
    config.validate()?;

    let mut caller = Caller::from_config(&config, root);
    if config.logging.verbose {
        let sink: Arc<Mutex<dyn io::Write + Send>> = Arc::new(Mutex::new(io::stderr()));
        caller = caller.with_live_output(sink);
    }
    let executor = AgentExecutor::new(caller, paths.clone());
    run_with_executor(&paths, &config, executor, cancel)
}

/// Run the ticket store at `paths` with an arbitrary executor.
pub fn run_with_executor<E: TicketExecutor>(
    paths: &RunnerPaths,
    config: &RunnerConfig,
    executor: E,
    cancel: CancelToken,
) -> Result<RunSummary> {
    let mut graph = load_graph(&paths.tickets_path).with_context(|| "load tickets.json")?;

    let interrupted = graph.recover_interrupted();
    if !interrupted.is_empty() {
        warn!(?interrupted, "tickets left in progress by a previous run marked failed");
        write_graph(&paths.tickets_path, &graph)?;
    }

    info!(
        tickets = graph.len(),
        max_parallel = config.max_parallel,
        dry_run = config.dry_run,
        "starting run"
    );
    let scheduler = Scheduler::new(
        executor,
        SchedulerConfig {
            max_parallel: config.max_parallel,
            strict_dependencies: config.strict_dependencies,
        },
    )
    .with_cancel(cancel);

    let tickets_path = paths.tickets_path.clone();
    let summary = scheduler.run(&mut graph, |graph| {
        if let Err(err) = write_graph(&tickets_path, graph) {
            warn!(err = %format!("{err:#}"), "failed to persist ticket store");
        }
    })?;
    write_graph(&paths.tickets_path, &graph)?;
    Ok(summary)
}

/// Manually move a failed ticket back to pending.
pub fn retry_from_root(root: &Path, id: &str) -> Result<()> {
    let paths = RunnerPaths::new(root);
    let mut graph = load_graph(&paths.tickets_path).with_context(|| "load tickets.json")?;
    graph.retry(id)?;
    write_graph(&paths.tickets_path, &graph)?;
    info!(ticket = %id, "ticket re-queued");
    Ok(())
}

/// Exit code for a finished run.
pub fn exit_code(summary: &RunSummary) -> i32 {
    match summary.stop {
        RunStop::Cancelled => exit_codes::CANCELLED,
        RunStop::Stalled { .. } => exit_codes::STALLED,
        RunStop::Complete if !summary.failed.is_empty() => exit_codes::FAILED,
        RunStop::Complete => exit_codes::OK,
    }
}
