//! Ticket status reporting for `ticket-runner status`.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::graph::{StatusCounts, TicketGraph};
use crate::io::init::RunnerPaths;
use crate::io::ticket_store::load_graph;
use crate::ticket::{Ticket, TicketStatus};

/// Snapshot of the ticket store for display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// Pending tickets that could start now, in dispatch order.
    pub eligible: Vec<String>,
    /// Pending tickets that can never start.
    pub blocked: Vec<String>,
    pub tickets: Vec<TicketLine>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketLine {
    pub id: String,
    pub title: String,
    pub status: TicketStatus,
    pub priority: u8,
    pub attempts: u32,
    /// Dependencies that are not completed yet.
    pub waiting_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StatusReport {
    pub fn from_graph(graph: &TicketGraph) -> Self {
        let StatusCounts {
            pending,
            in_progress,
            completed,
            failed,
        } = graph.counts();
        let blocked_ids = graph.blocked_ids();
        Self {
            total: graph.len(),
            pending,
            in_progress,
            completed,
            failed,
            eligible: graph.eligible().iter().map(|t| t.id.clone()).collect(),
            blocked: graph
                .ids_with_status(TicketStatus::Pending)
                .into_iter()
                .filter(|id| blocked_ids.contains(id))
                .collect(),
            tickets: graph.iter().map(|t| TicketLine::new(graph, t)).collect(),
        }
    }

    /// Plain-text rendering, one line per ticket.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} tickets: {} pending, {} in progress, {} completed, {} failed",
            self.total, self.pending, self.in_progress, self.completed, self.failed
        );
        for line in &self.tickets {
            let _ = write!(
                out,
                "{:<12} {:<12} p{} {}",
                line.id, line.status, line.priority, line.title
            );
            if !line.waiting_on.is_empty() && line.status == TicketStatus::Pending {
                let _ = write!(out, " (waiting on {})", line.waiting_on.join(", "));
            }
            if self.blocked.contains(&line.id) {
                out.push_str(" [blocked]");
            }
            out.push('\n');
            if let Some(err) = &line.last_error {
                let _ = writeln!(out, "{:<12} last error (attempt {}): {err}", "", line.attempts);
            }
        }
        if !self.eligible.is_empty() {
            let _ = writeln!(out, "next: {}", self.eligible.join(", "));
        }
        out
    }
}

impl TicketLine {
    fn new(graph: &TicketGraph, ticket: &Ticket) -> Self {
        Self {
            id: ticket.id.clone(),
            title: ticket.title.clone(),
            status: ticket.status,
            priority: ticket.priority,
            attempts: ticket.attempts,
            waiting_on: graph
                .blockers(&ticket.id)
                .into_iter()
                .map(str::to_string)
                .collect(),
            last_error: ticket.last_error.clone(),
        }
    }
}

/// Load the ticket store under `root` and summarize it.
pub fn status_from_root(root: &Path) -> Result<StatusReport> {
    let paths = RunnerPaths::new(root);
    let graph = load_graph(&paths.tickets_path).with_context(|| "load tickets for status")?;
    Ok(StatusReport::from_graph(&graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ticket, ticket_with_deps};

    /// Verifies counts, eligibility and blocked tickets in the report.
    #[test]
    fn report_summarizes_graph() {
        let mut done = ticket("A", 1);
        done.status = TicketStatus::Completed;
        let graph = TicketGraph::new(vec![
            done,
            ticket_with_deps("B", 2, &["A"]),
            ticket_with_deps("C", 1, &["B"]),
            ticket_with_deps("D", 1, &["ghost"]),
        ])
        .expect("graph");

        let report = StatusReport::from_graph(&graph);

        assert_eq!(report.total, 4);
        assert_eq!(report.completed, 1);
        assert_eq!(report.pending, 3);
        assert_eq!(report.eligible, vec!["B"]);
        assert_eq!(report.blocked, vec!["D"]);

        let text = report.render();
        assert!(text.starts_with("4 tickets: 3 pending"));
        assert!(text.contains("(waiting on B)"));
        assert!(text.contains("[blocked]"));
        assert!(text.contains("next: B"));
    }
}
