//! Prompt rendering for a single ticket.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::ticket::Ticket;

const TICKET_TEMPLATE: &str = include_str!("prompts/ticket.md");

/// Ticket fields exposed to the template.
#[derive(Debug, Clone, Serialize)]
struct TicketContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    ticket_type: &'a str,
    priority: u8,
    estimated_complexity: &'a str,
    acceptance_criteria: &'a [String],
    files_to_create: &'a [String],
    files_to_modify: &'a [String],
    dependencies: &'a [String],
}

impl<'a> TicketContext<'a> {
    fn from_ticket(ticket: &'a Ticket) -> Self {
        Self {
            id: &ticket.id,
            title: &ticket.title,
            description: ticket.description.trim(),
            ticket_type: ticket.ticket_type.as_str(),
            priority: ticket.priority,
            estimated_complexity: ticket.estimated_complexity.trim(),
            acceptance_criteria: &ticket.acceptance_criteria,
            files_to_create: &ticket.files_to_create,
            files_to_modify: &ticket.files_to_modify,
            dependencies: &ticket.dependencies,
        }
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("ticket", TICKET_TEMPLATE)
            .expect("ticket template should be valid");
        Self { env }
    }

    /// Render the agent prompt for `ticket`.
    ///
    /// `output_path` is where the agent is asked to write its JSON report.
    pub fn build(&self, ticket: &Ticket, output_path: &Path) -> Result<String> {
        let template = self.env.get_template("ticket")?;
        let rendered = template.render(context! {
            ticket => TicketContext::from_ticket(ticket),
            attempt => ticket.attempts.max(1),
            last_error => ticket.last_error.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            output_path => output_path.display().to_string(),
        })?;
        debug!(ticket = %ticket.id, bytes = rendered.len(), "prompt rendered");
        Ok(rendered)
    }
}
