//! In-memory ticket dependency graph.
//!
//! The graph owns every ticket of a run. Status changes go through
//! [`TicketGraph::transition`], which enforces the ticket state machine:
//!
//! ```text
//! pending -> in_progress -> completed
//!                        -> failed -> pending (manual retry)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::ticket::{Ticket, TicketStatus};

/// A dependency declaration that can never be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyIssue {
    #[error("{ticket}: depends on unknown ticket '{missing}'")]
    UnknownDependency { ticket: String, missing: String },
    #[error("{ticket}: depends on itself")]
    SelfDependency { ticket: String },
    #[error("dependency cycle between {}", members.join(", "))]
    Cycle { members: Vec<String> },
}

impl DependencyIssue {
    /// Tickets directly affected by this issue.
    pub fn tickets(&self) -> Vec<&str> {
        match self {
            DependencyIssue::UnknownDependency { ticket, .. }
            | DependencyIssue::SelfDependency { ticket } => vec![ticket.as_str()],
            DependencyIssue::Cycle { members } => members.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate ticket id '{0}'")]
    DuplicateId(String),
    #[error("unknown ticket '{0}'")]
    UnknownTicket(String),
    #[error("{id}: illegal status transition {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: TicketStatus,
        to: TicketStatus,
    },
}

/// Number of tickets per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketGraph {
    tickets: BTreeMap<String, Ticket>,
}

impl TicketGraph {
    pub fn new(tickets: Vec<Ticket>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        for ticket in tickets {
            if map.contains_key(&ticket.id) {
                return Err(GraphError::DuplicateId(ticket.id));
            }
            map.insert(ticket.id.clone(), ticket);
        }
        Ok(Self { tickets: map })
    }

    pub fn get(&self, id: &str) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Tickets ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    /// Owned copy of every ticket, ordered by id.
    pub fn snapshot(&self) -> Vec<Ticket> {
        self.tickets.values().cloned().collect()
    }

    pub fn into_tickets(self) -> Vec<Ticket> {
        self.tickets.into_values().collect()
    }

    /// Pending tickets whose dependencies all exist and are completed,
    /// ordered by `(priority, id)`.
    pub fn eligible(&self) -> Vec<&Ticket> {
        let mut ready: Vec<&Ticket> = self
            .tickets
            .values()
            .filter(|ticket| ticket.status == TicketStatus::Pending)
            .filter(|ticket| {
                ticket.dependencies.iter().all(|dep| {
                    self.tickets
                        .get(dep)
                        .is_some_and(|d| d.status == TicketStatus::Completed)
                })
            })
            .collect();
        ready.sort_by(|a, b| a.dispatch_key().cmp(&b.dispatch_key()));
        ready
    }

    /// Dependencies of `id` that are not yet completed.
    pub fn blockers(&self, id: &str) -> Vec<&str> {
        let Some(ticket) = self.tickets.get(id) else {
            return Vec::new();
        };
        ticket
            .dependencies
            .iter()
            .filter(|dep| {
                self.tickets
                    .get(dep.as_str())
                    .is_none_or(|d| d.status != TicketStatus::Completed)
            })
            .map(String::as_str)
            .collect()
    }

    /// Every unsatisfiable dependency declaration, in deterministic order:
    /// unknown ids and self-dependencies by ticket id, then cycles.
    pub fn issues(&self) -> Vec<DependencyIssue> {
        let mut issues = Vec::new();
        for ticket in self.tickets.values() {
            for dep in &ticket.dependencies {
                if dep == &ticket.id {
                    issues.push(DependencyIssue::SelfDependency {
                        ticket: ticket.id.clone(),
                    });
                } else if !self.tickets.contains_key(dep) {
                    issues.push(DependencyIssue::UnknownDependency {
                        ticket: ticket.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        for members in self.cycles() {
            issues.push(DependencyIssue::Cycle { members });
        }
        issues
    }

    /// Tickets that can never become eligible because of an issue, directly
    /// or through a dependency.
    pub fn blocked_ids(&self) -> BTreeSet<String> {
        let mut blocked: BTreeSet<String> = self
            .issues()
            .iter()
            .flat_map(|issue| issue.tickets())
            .map(str::to_string)
            .collect();
        loop {
            let before = blocked.len();
            for ticket in self.tickets.values() {
                if !blocked.contains(&ticket.id)
                    && ticket.dependencies.iter().any(|dep| blocked.contains(dep))
                {
                    blocked.insert(ticket.id.clone());
                }
            }
            if blocked.len() == before {
                return blocked;
            }
        }
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for ticket in self.tickets.values() {
            match ticket.status {
                TicketStatus::Pending => counts.pending += 1,
                TicketStatus::InProgress => counts.in_progress += 1,
                TicketStatus::Completed => counts.completed += 1,
                TicketStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn ids_with_status(&self, status: TicketStatus) -> Vec<String> {
        self.tickets
            .values()
            .filter(|ticket| ticket.status == status)
            .map(|ticket| ticket.id.clone())
            .collect()
    }

    /// Pending work remains but nothing is running and nothing can start.
    pub fn is_stalled(&self) -> bool {
        let counts = self.counts();
        counts.pending > 0 && counts.in_progress == 0 && self.eligible().is_empty()
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// Starting a ticket increments its attempt counter; completing or
    /// re-queueing it clears the last recorded failure.
    pub fn transition(&mut self, id: &str, to: TicketStatus) -> Result<(), GraphError> {
        let ticket = self
            .tickets
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTicket(id.to_string()))?;
        let from = ticket.status;
        let legal = matches!(
            (from, to),
            (TicketStatus::Pending, TicketStatus::InProgress)
                | (TicketStatus::InProgress, TicketStatus::Completed)
                | (TicketStatus::InProgress, TicketStatus::Failed)
                | (TicketStatus::Failed, TicketStatus::Pending)
        );
        if !legal {
            return Err(GraphError::IllegalTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        match to {
            TicketStatus::InProgress => ticket.attempts += 1,
            TicketStatus::Completed | TicketStatus::Pending => ticket.last_error = None,
            TicketStatus::Failed => {}
        }
        ticket.status = to;
        Ok(())
    }

    /// Mark an in-progress ticket failed, recording why.
    pub fn fail(&mut self, id: &str, reason: impl Into<String>) -> Result<(), GraphError> {
        self.transition(id, TicketStatus::Failed)?;
        if let Some(ticket) = self.tickets.get_mut(id) {
            ticket.last_error = Some(reason.into());
        }
        Ok(())
    }

    /// Manual `failed -> pending` transition.
    pub fn retry(&mut self, id: &str) -> Result<(), GraphError> {
        self.transition(id, TicketStatus::Pending)
    }

    /// Fail tickets left `in_progress` by an interrupted run so they can be
    /// retried. Returns the affected ids.
    pub fn recover_interrupted(&mut self) -> Vec<String> {
        let stale = self.ids_with_status(TicketStatus::InProgress);
        for id in &stale {
            // in_progress -> failed is always legal
            let _ = self.fail(id, "interrupted: previous run ended while in progress");
        }
        stale
    }

    /// Strongly connected components with more than one member, each sorted.
    fn cycles(&self) -> Vec<Vec<String>> {
        let mut tarjan = Tarjan {
            tickets: &self.tickets,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            components: Vec::new(),
        };
        for id in self.tickets.keys() {
            if !tarjan.index.contains_key(id.as_str()) {
                tarjan.visit(id.as_str());
            }
        }
        let mut components = tarjan.components;
        components.sort();
        components
    }
}

struct Tarjan<'a> {
    tickets: &'a BTreeMap<String, Ticket>,
    next_index: usize,
    index: HashMap<&'a str, usize>,
    lowlink: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: HashSet<&'a str>,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    /// Iterative, so dependency chain depth is not bounded by the thread stack.
    fn visit(&mut self, root: &'a str) {
        self.open(root);
        let mut frames: Vec<(&'a str, usize)> = vec![(root, 0)];
        while let Some(frame) = frames.last_mut() {
            let v = frame.0;
            if let Some(dep) = self.deps(v).get(frame.1) {
                frame.1 += 1;
                let w = dep.as_str();
                if w == v || !self.tickets.contains_key(w) {
                    continue;
                }
                if !self.index.contains_key(w) {
                    self.open(w);
                    frames.push((w, 0));
                } else if self.on_stack.contains(w) {
                    let low = self.lowlink[&v].min(self.index[&w]);
                    self.lowlink.insert(v, low);
                }
                continue;
            }

            frames.pop();
            if let Some(&(parent, _)) = frames.last() {
                let low = self.lowlink[&parent].min(self.lowlink[&v]);
                self.lowlink.insert(parent, low);
            }
            if self.lowlink[&v] == self.index[&v] {
                self.close(v);
            }
        }
    }

    fn deps(&self, v: &str) -> &'a [String] {
        let tickets = self.tickets;
        tickets
            .get(v)
            .map_or(&[][..], |ticket| ticket.dependencies.as_slice())
    }

    fn open(&mut self, v: &'a str) {
        self.index.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);
    }

    /// Pop the component rooted at `v`; only real cycles are kept.
    fn close(&mut self, v: &'a str) {
        let mut component = Vec::new();
        while let Some(w) = self.stack.pop() {
            self.on_stack.remove(w);
            component.push(w.to_string());
            if w == v {
                break;
            }
        }
        if component.len() > 1 {
            component.sort();
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ticket, ticket_with_deps};

    fn ids(tickets: Vec<&Ticket>) -> Vec<&str> {
        tickets.into_iter().map(|t| t.id.as_str()).collect()
    }

    fn complete(graph: &mut TicketGraph, id: &str) {
        graph.transition(id, TicketStatus::InProgress).expect("start");
        graph.transition(id, TicketStatus::Completed).expect("complete");
    }

    #[test]
    fn eligibility_follows_dependency_chain() {
        let mut graph = TicketGraph::new(vec![
            ticket("A", 3),
            ticket_with_deps("B", 3, &["A"]),
            ticket_with_deps("C", 3, &["A", "B"]),
        ])
        .expect("graph");

        assert_eq!(ids(graph.eligible()), vec!["A"]);
        complete(&mut graph, "A");
        assert_eq!(ids(graph.eligible()), vec!["B"]);
        complete(&mut graph, "B");
        assert_eq!(ids(graph.eligible()), vec!["C"]);
        complete(&mut graph, "C");
        assert!(graph.eligible().is_empty());
        assert!(!graph.is_stalled());
    }

    #[test]
    fn eligible_orders_by_priority_then_id() {
        let graph = TicketGraph::new(vec![
            ticket("d", 2),
            ticket("b", 1),
            ticket("c", 2),
            ticket("a", 5),
        ])
        .expect("graph");
        assert_eq!(ids(graph.eligible()), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn in_progress_dependency_does_not_unblock() {
        let mut graph =
            TicketGraph::new(vec![ticket("A", 1), ticket_with_deps("B", 1, &["A"])]).expect("graph");
        graph.transition("A", TicketStatus::InProgress).expect("start");
        assert!(graph.eligible().is_empty());
        assert_eq!(graph.blockers("B"), vec!["A"]);
    }

    #[test]
    fn two_cycle_is_reported_and_stalls() {
        let graph = TicketGraph::new(vec![
            ticket_with_deps("X", 1, &["Y"]),
            ticket_with_deps("Y", 1, &["X"]),
            ticket_with_deps("Z", 1, &["X"]),
        ])
        .expect("graph");

        assert_eq!(
            graph.issues(),
            vec![DependencyIssue::Cycle {
                members: vec!["X".to_string(), "Y".to_string()]
            }]
        );
        assert!(graph.is_stalled());
        let blocked: Vec<String> = graph.blocked_ids().into_iter().collect();
        assert_eq!(blocked, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn unknown_and_self_dependencies_are_reported() {
        let graph = TicketGraph::new(vec![
            ticket_with_deps("a", 1, &["ghost"]),
            ticket_with_deps("b", 1, &["b"]),
            ticket("c", 1),
        ])
        .expect("graph");

        let issues = graph.issues();
        assert_eq!(
            issues,
            vec![
                DependencyIssue::UnknownDependency {
                    ticket: "a".to_string(),
                    missing: "ghost".to_string(),
                },
                DependencyIssue::SelfDependency {
                    ticket: "b".to_string()
                },
            ]
        );
        assert_eq!(ids(graph.eligible()), vec!["c"]);
    }

    #[test]
    fn longer_cycle_found_once() {
        let graph = TicketGraph::new(vec![
            ticket_with_deps("p", 1, &["r"]),
            ticket_with_deps("q", 1, &["p"]),
            ticket_with_deps("r", 1, &["q"]),
            ticket_with_deps("s", 1, &["p"]),
        ])
        .expect("graph");
        let issues = graph.issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].to_string().contains("p, q, r"));
    }

    #[test]
    fn very_long_chain_is_walked_without_recursion() {
        let len = 50_000;
        let mut tickets = vec![ticket("c0", 1)];
        for i in 1..len {
            let prev = format!("c{}", i - 1);
            tickets.push(ticket_with_deps(&format!("c{i}"), 1, &[prev.as_str()]));
        }
        tickets[0].dependencies = vec![format!("c{}", len - 1)];
        let graph = TicketGraph::new(tickets).expect("graph");

        let issues = graph.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].tickets().len(), len);
    }

    #[test]
    fn transitions_follow_state_machine() {
        let mut graph = TicketGraph::new(vec![ticket("t", 1)]).expect("graph");

        let err = graph
            .transition("t", TicketStatus::Completed)
            .expect_err("pending -> completed is illegal");
        assert!(matches!(err, GraphError::IllegalTransition { .. }));

        graph.transition("t", TicketStatus::InProgress).expect("start");
        graph.fail("t", "agent exited 1").expect("fail");
        let failed = graph.get("t").expect("ticket");
        assert_eq!(failed.status, TicketStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("agent exited 1"));

        graph.retry("t").expect("retry");
        let retried = graph.get("t").expect("ticket");
        assert_eq!(retried.status, TicketStatus::Pending);
        assert_eq!(retried.last_error, None);

        assert_eq!(
            graph.retry("missing"),
            Err(GraphError::UnknownTicket("missing".to_string()))
        );
    }

    #[test]
    fn recover_interrupted_fails_stale_tickets() {
        let mut stale = ticket("s", 1);
        stale.status = TicketStatus::InProgress;
        let mut graph = TicketGraph::new(vec![stale, ticket("p", 1)]).expect("graph");

        assert_eq!(graph.recover_interrupted(), vec!["s".to_string()]);
        assert_eq!(graph.get("s").map(|t| t.status), Some(TicketStatus::Failed));
        assert_eq!(graph.counts().pending, 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = TicketGraph::new(vec![ticket("a", 1), ticket("a", 2)]).expect_err("dup");
        assert_eq!(err, GraphError::DuplicateId("a".to_string()));
    }
}
