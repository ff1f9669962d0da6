//! JSON-RPC-style request dispatch.
//!
//! `POST /rpc` with `{method, params}` mirrors the path-based surface for
//! clients that prefer a single endpoint: `discovery`, `create_task`,
//! `get_task`, `add_message`, `process_task`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::MessageDraft;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RpcRequest>,
) -> Result<Json<Value>, TaskError> {
    let response = match request.method.as_str() {
        "discovery" => serde_json::to_value(&state.card).unwrap_or_default(),
        "create_task" => {
            let message = parse_field::<MessageDraft>(&request.params, "message");
            let task = state.store.create_task(message).await;
            json!({ "task_id": task.id })
        }
        "get_task" => {
            let task_id = require_task_id(&request.params)?;
            let task = state.store.get_task(task_id).await?;
            serde_json::to_value(&task).unwrap_or_default()
        }
        "add_message" => {
            let task_id = require_task_id(&request.params)?;
            let draft = parse_field::<MessageDraft>(&request.params, "message")
                .unwrap_or_else(|| MessageDraft::user_text(""));
            let appended = state.store.add_message(task_id, draft).await?;
            serde_json::to_value(&appended.message).unwrap_or_default()
        }
        "process_task" => {
            let task_id = require_task_id(&request.params)?;
            process_task(&state, task_id).await?
        }
        other => json!({ "error": format!("Unknown method: {}", other) }),
    };
    Ok(Json(response))
}

/// Run the backend over a task's conversation and settle it, returning the
/// original-protocol result shape.
async fn process_task(state: &AppState, task_id: Uuid) -> Result<Value, TaskError> {
    use crate::task::TaskStatus;

    let task = state.store.get_task(task_id).await?;
    if task.status == TaskStatus::Submitted {
        state.store.update_status(task_id, TaskStatus::Working).await?;
    }

    let messages = state.store.get_messages(task_id).await?;
    match state.backend.complete(&messages).await {
        Ok(result) => {
            let (task, reply) = state.store.complete_task(task_id, result).await?;
            Ok(json!({
                "task_id": task_id,
                "status": task.status,
                "message": reply,
            }))
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Generation failed");
            let task = state.store.fail_task(task_id, &e.to_string()).await?;
            Ok(json!({
                "task_id": task_id,
                "status": task.status,
                "error": e.to_string(),
            }))
        }
    }
}

fn require_task_id(params: &Value) -> Result<Uuid, TaskError> {
    params["task_id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(TaskError::TaskNotFound(Uuid::nil()))
}

fn parse_field<T: serde::de::DeserializeOwned>(params: &Value, key: &str) -> Option<T> {
    serde_json::from_value(params.get(key)?.clone()).ok()
}
