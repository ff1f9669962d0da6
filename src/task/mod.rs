//! Task and message domain types.
//!
//! A task owns an append-only log of messages and moves through a fixed
//! lifecycle graph. Statuses use the A2A kebab-case wire names.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use store::TaskStore;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Received, not yet being processed
    Submitted,
    /// Actively being processed
    Working,
    /// Waiting for further input from the user
    InputRequired,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Canceled before completion
    Canceled,
}

impl TaskStatus {
    /// Whether this status admits no further transitions or appends.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Whether `next` is reachable from this status in one step.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Submitted, Working) | (Submitted, Canceled) => true,
            (Working, Completed) | (Working, Failed) => true,
            (Working, InputRequired) | (Working, Canceled) => true,
            (InputRequired, Working) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::Working => "working",
            TaskStatus::InputRequired => "input-required",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// Sender of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One typed content fragment of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Part {
    /// Plain text
    Text(String),
    /// Structured JSON payload (escape hatch for opaque data)
    Json(serde_json::Value),
    /// Base64-encoded binary payload
    Binary(String),
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One exchange unit appended to a task's log. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub task_id: Uuid,
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Concatenated text content across all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Build an agent reply carrying a single text part.
    pub fn agent_text(task_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            role: Role::Agent,
            parts: vec![Part::Text(content.into())],
            timestamp: Utc::now(),
        }
    }
}

/// Caller-supplied message, before the store assigns id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    /// Client-chosen id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl MessageDraft {
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            parts: vec![Part::Text(content.into())],
        }
    }

    pub(crate) fn into_message(self, task_id: Uuid, timestamp: DateTime<Utc>) -> Message {
        Message {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            task_id,
            role: self.role,
            parts: self.parts,
            timestamp,
        }
    }
}

/// A unit of work with lifecycle status and an ordered message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub status: TaskStatus,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Final payload, present only once the task is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}
