//! Structured errors returned by the task engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Errors produced by task and message operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Message not found: {0} (task {1})")]
    MessageNotFound(Uuid, Uuid),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {id} is {status}; no further messages accepted")]
    InvalidState { id: Uuid, status: TaskStatus },
}

impl TaskError {
    /// Stable machine-readable kind, exposed in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::TaskNotFound(_) | TaskError::MessageNotFound(..) => "not_found",
            TaskError::InvalidTransition { .. } => "invalid_transition",
            TaskError::InvalidState { .. } => "invalid_state",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            TaskError::TaskNotFound(_) | TaskError::MessageNotFound(..) => StatusCode::NOT_FOUND,
            TaskError::InvalidTransition { .. } | TaskError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
        }
    }
}

/// Wire format for structured errors.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Errors from the generation backend (opaque collaborator).
///
/// Never serialized to HTTP directly: the synchronous processing path marks
/// the task `failed` and reports 502, the streaming path emits an `error`
/// stream event.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned malformed response: {0}")]
    Malformed(String),

    #[error("Backend error: {0}")]
    Other(String),
}
