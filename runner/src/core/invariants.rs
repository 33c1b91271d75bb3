//! Semantic invariants not expressible via JSON Schema.

use crate::ticket::Ticket;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Ticket ids name files under `.runner/outputs/`, so they are restricted to
/// a single safe path component. Mirrors the schema's `id.pattern`.
static TICKET_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("ticket id regex should be valid")
});

pub fn is_valid_ticket_id(id: &str) -> bool {
    TICKET_ID.is_match(id)
}

/// Check per-ticket invariants of a ticket set:
/// - Non-empty, unique ids made of `[A-Za-z0-9._-]`, not starting with `.`
/// - `priority` within 1..=5
/// - No duplicate entries in `dependencies`
///
/// Dependency resolution (unknown ids, self-dependencies, cycles) is reported
/// by [`crate::core::graph::TicketGraph::issues`] instead.
pub fn validate_invariants(tickets: &[Ticket]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for ticket in tickets {
        if ticket.id.trim().is_empty() {
            errors.push("ticket id must not be empty".to_string());
        } else if !is_valid_ticket_id(&ticket.id) {
            errors.push(format!(
                "ticket id '{}' must match [A-Za-z0-9][A-Za-z0-9._-]*",
                ticket.id
            ));
        }
        if !seen.insert(ticket.id.as_str()) {
            errors.push(format!("duplicate id '{}'", ticket.id));
        }
        if !(1..=5).contains(&ticket.priority) {
            errors.push(format!(
                "{}: priority {} outside 1..=5",
                ticket.id, ticket.priority
            ));
        }
        let mut deps = HashSet::new();
        for dep in &ticket.dependencies {
            if !deps.insert(dep.as_str()) {
                errors.push(format!("{}: dependency '{}' listed twice", ticket.id, dep));
            }
        }
    }
    errors
}
