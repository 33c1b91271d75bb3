//! Parallel dispatch of eligible tickets.
//!
//! The scheduler thread owns the [`TicketGraph`]. Workers run on scoped
//! threads and report back over a channel, so every status change happens
//! on one thread and `on_update` always observes a consistent graph.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::graph::{DependencyIssue, GraphError, TicketGraph};
use crate::io::executor::TicketExecutor;
use crate::ticket::TicketStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of tickets executing at once.
    pub max_parallel: usize,
    /// Abort before dispatch when any dependency is unsatisfiable.
    pub strict_dependencies: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            strict_dependencies: false,
        }
    }
}

/// Reason why `Scheduler::run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// No pending tickets remain.
    Complete,
    /// Pending tickets remain but none can become eligible.
    Stalled { pending: Vec<String> },
    /// Cancellation was requested; in-flight tickets were drained.
    Cancelled,
}

/// Summary of a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: u32,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Unsatisfiable dependencies found before dispatch.
    pub issues: Vec<DependencyIssue>,
    pub stop: RunStop,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unsatisfiable dependencies: {}", join_issues(.issues))]
    DependencyUnsatisfiable { issues: Vec<DependencyIssue> },
    #[error("max_parallel must be > 0")]
    InvalidParallelism,
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn join_issues(issues: &[DependencyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct Scheduler<E> {
    executor: E,
    config: SchedulerConfig,
    cancel: CancelToken,
}

impl<E: TicketExecutor> Scheduler<E> {
    pub fn new(executor: E, config: SchedulerConfig) -> Self {
        Self {
            executor,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share an externally owned cancellation token (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Dispatch tickets until nothing is running and nothing more can start.
    ///
    /// `on_update` is called on the scheduler thread after each batch of
    /// dispatches and after each completion.
    #[instrument(skip_all, fields(max_parallel = self.config.max_parallel, tickets = graph.len()))]
    pub fn run<F: FnMut(&TicketGraph)>(
        &self,
        graph: &mut TicketGraph,
        mut on_update: F,
    ) -> Result<RunSummary, SchedulerError> {
        if self.config.max_parallel == 0 {
            return Err(SchedulerError::InvalidParallelism);
        }

        let issues = graph.issues();
        if !issues.is_empty() {
            for issue in &issues {
                warn!(%issue, "unsatisfiable dependency");
            }
            if self.config.strict_dependencies {
                return Err(SchedulerError::DependencyUnsatisfiable { issues });
            }
        }

        let mut dispatched = 0u32;
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let (done_tx, done_rx) = mpsc::channel::<(String, Result<(), String>)>();

        thread::scope(|scope| -> Result<(), SchedulerError> {
            let mut running = 0usize;
            loop {
                if !self.cancel.is_cancelled() && running < self.config.max_parallel {
                    let batch: Vec<String> = graph
                        .eligible()
                        .into_iter()
                        .take(self.config.max_parallel - running)
                        .map(|ticket| ticket.id.clone())
                        .collect();
                    for id in &batch {
                        graph.transition(id, TicketStatus::InProgress)?;
                        let ticket = graph
                            .get(id)
                            .cloned()
                            .ok_or_else(|| GraphError::UnknownTicket(id.clone()))?;
                        running += 1;
                        dispatched += 1;
                        info!(ticket = %id, priority = ticket.priority, attempt = ticket.attempts, running, "dispatching ticket");

                        let done_tx = done_tx.clone();
                        let executor = &self.executor;
                        let cancel = self.cancel.clone();
                        scope.spawn(move || {
                            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                                executor.execute(&ticket, &cancel)
                            })) {
                                Ok(Ok(())) => Ok(()),
                                Ok(Err(err)) => Err(format!("{err:#}")),
                                Err(payload) => Err(format!(
                                    "executor panicked: {}",
                                    panic_message(payload.as_ref())
                                )),
                            };
                            // The receiver outlives the scope.
                            let _ = done_tx.send((ticket.id, outcome));
                        });
                    }
                    if !batch.is_empty() {
                        on_update(graph);
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok((id, outcome)) = done_rx.recv() else {
                    break;
                };
                running -= 1;
                match outcome {
                    Ok(()) => {
                        graph.transition(&id, TicketStatus::Completed)?;
                        info!(ticket = %id, running, "ticket completed");
                        completed.push(id);
                    }
                    Err(reason) => {
                        warn!(ticket = %id, %reason, running, "ticket failed");
                        graph.fail(&id, reason)?;
                        failed.push(id);
                    }
                }
                on_update(graph);
            }
            Ok(())
        })?;

        let pending = graph.ids_with_status(TicketStatus::Pending);
        let stop = if self.cancel.is_cancelled() {
            RunStop::Cancelled
        } else if pending.is_empty() {
            RunStop::Complete
        } else {
            warn!(?pending, "no eligible tickets remain");
            RunStop::Stalled { pending }
        };
        debug!(?stop, dispatched, "scheduler finished");

        Ok(RunSummary {
            dispatched,
            completed,
            failed,
            issues,
            stop,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
