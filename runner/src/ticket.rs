use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Completed => "completed",
            TicketStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Failed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    Feature,
    Test,
    Refactor,
    Docs,
    Bugfix,
    Performance,
    Security,
}

impl TicketType {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketType::Feature => "feature",
            TicketType::Test => "test",
            TicketType::Refactor => "refactor",
            TicketType::Docs => "docs",
            TicketType::Bugfix => "bugfix",
            TicketType::Performance => "performance",
            TicketType::Security => "security",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    /// 1 (highest) through 5.
    pub priority: u8,
    pub status: TicketStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub estimated_complexity: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Number of times the scheduler has dispatched this ticket.
    #[serde(default)]
    pub attempts: u32,
    /// Failure reason of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Ticket {
    /// A pending ticket with empty metadata.
    pub fn new(id: impl Into<String>, title: impl Into<String>, ticket_type: TicketType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            ticket_type,
            priority: 3,
            status: TicketStatus::Pending,
            dependencies: Vec::new(),
            estimated_complexity: String::new(),
            acceptance_criteria: Vec::new(),
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Scheduling order within a batch of eligible tickets.
    pub fn dispatch_key(&self) -> (u8, &str) {
        (self.priority, self.id.as_str())
    }
}
