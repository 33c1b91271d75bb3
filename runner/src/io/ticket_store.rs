//! Ticket store load/save with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::graph::TicketGraph;
use crate::core::invariants::validate_invariants;
use crate::ticket::Ticket;

/// JSON Schema for `.runner/tickets.json`.
pub const TICKET_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/tickets/v1.schema.json"
));

pub const STORE_VERSION: u32 = 1;

/// On-disk layout of the ticket store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketFile {
    pub version: u32,
    pub tickets: Vec<Ticket>,
}

impl TicketFile {
    pub fn new(tickets: Vec<Ticket>) -> Self {
        Self {
            version: STORE_VERSION,
            tickets,
        }
    }
}

/// Load and validate tickets from disk (schema + invariants).
pub fn load_tickets(path: &Path) -> Result<Vec<Ticket>> {
    debug!(path = %path.display(), "loading tickets");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tickets {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse tickets {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let file: TicketFile = serde_json::from_value(value)
        .with_context(|| format!("deserialize tickets {}", path.display()))?;
    let errors = validate_invariants(&file.tickets);
    if !errors.is_empty() {
        return Err(anyhow!(
            "ticket invariants failed in {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    debug!(count = file.tickets.len(), "tickets loaded");
    Ok(file.tickets)
}

/// Load tickets and build the dependency graph.
pub fn load_graph(path: &Path) -> Result<TicketGraph> {
    let tickets = load_tickets(path)?;
    TicketGraph::new(tickets).with_context(|| format!("build graph from {}", path.display()))
}

/// Atomically write tickets, sorted by id.
pub fn write_tickets(path: &Path, tickets: &[Ticket]) -> Result<()> {
    let mut sorted = tickets.to_vec();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let mut buf = serde_json::to_string_pretty(&TicketFile::new(sorted))?;
    buf.push('\n');
    debug!(path = %path.display(), count = tickets.len(), "writing tickets");
    super::write_atomic(path, &buf)
}

/// Persist the current graph state.
pub fn write_graph(path: &Path, graph: &TicketGraph) -> Result<()> {
    write_tickets(path, &graph.snapshot())
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(TICKET_SCHEMA).context("parse ticket schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "ticket schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
