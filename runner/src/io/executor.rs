//! Ticket execution backends.
//!
//! The [`TicketExecutor`] trait decouples scheduling from the agent CLI.
//! Tests use scripted executors that succeed, fail or panic on demand
//! without spawning processes.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::invariants::is_valid_ticket_id;
use crate::core::stream::StreamEvent;
use crate::io::caller::{CallError, CallOptions, Caller};
use crate::io::init::RunnerPaths;
use crate::io::prompt::PromptBuilder;
use crate::ticket::Ticket;

/// Runs one ticket to completion. Shared across worker threads.
pub trait TicketExecutor: Sync {
    /// Returns `Ok` when the ticket is done; the error text becomes the
    /// ticket's failure reason.
    fn execute(&self, ticket: &Ticket, cancel: &CancelToken) -> Result<()>;
}

/// Executor that renders a prompt and invokes the agent CLI.
pub struct AgentExecutor {
    caller: Caller,
    prompts: PromptBuilder,
    paths: RunnerPaths,
    timeout: Option<Duration>,
}

impl AgentExecutor {
    pub fn new(caller: Caller, paths: RunnerPaths) -> Self {
        Self {
            caller,
            prompts: PromptBuilder::new(),
            paths,
            timeout: None,
        }
    }

    /// Override the caller's per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Files handed to the agent as context: the ones it is asked to modify
    /// that exist under the project root.
    fn context_files(&self, ticket: &Ticket) -> Vec<PathBuf> {
        ticket
            .files_to_modify
            .iter()
            .map(PathBuf::from)
            .filter(|path| self.paths.root.join(path).is_file())
            .collect()
    }
}

impl TicketExecutor for AgentExecutor {
    #[instrument(skip_all, fields(ticket = %ticket.id, attempt = ticket.attempts))]
    fn execute(&self, ticket: &Ticket, cancel: &CancelToken) -> Result<()> {
        if !is_valid_ticket_id(&ticket.id) {
            bail!("ticket id '{}' is not a valid file name", ticket.id);
        }
        if self.caller.is_dry_run() {
            info!("dry run; marking ticket complete");
            return Ok(());
        }

        let output_path = self.paths.output_path(&ticket.id);
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }
        let prompt = self.prompts.build(ticket, &output_path)?;

        let mut event_count = 0usize;
        let mut on_event = |event: &StreamEvent| {
            event_count += 1;
            debug!(kind = %event.kind, subtype = %event.subtype, "agent event");
        };
        let mut options = CallOptions::default()
            .working_dir(&self.paths.root)
            .context_files(self.context_files(ticket))
            .cancel(cancel.clone())
            .on_event(&mut on_event);
        if let Some(timeout) = self.timeout {
            options = options.timeout(timeout);
        }

        info!("invoking agent");
        let report = match self.caller.call_for_json(&prompt, &output_path, options) {
            Ok((_, report)) => report,
            Err(failure) => match failure.kind {
                CallError::Decode { reason } => {
                    warn!(%reason, "agent succeeded without a readable report");
                    return Ok(());
                }
                kind => return Err(anyhow!(kind)),
            },
        };
        debug!(events = event_count, "agent call finished");

        let summary = report
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match report.get("status").and_then(Value::as_str) {
            Some("blocked") => Err(anyhow!("agent reported blocked: {summary}")),
            status => {
                info!(status = status.unwrap_or("unspecified"), %summary, "ticket finished");
                Ok(())
            }
        }
    }
}
