//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Message, MessageDraft, TaskStatus};

/// Request to create a new task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    /// Optional first message seeding the task's log
    #[serde(default)]
    pub message: Option<MessageDraft>,
}

/// Filter for task listings.
#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

/// Response to appending a message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AppendResponse {
    /// The append triggered processing; carries the agent's reply.
    Processed {
        task_id: Uuid,
        status: TaskStatus,
        message: Message,
    },
    /// The message was stored without triggering processing.
    Stored { message: Message },
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}
