//! Task, message, and streaming handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use futures::StreamExt;
use uuid::Uuid;

use crate::error::{ErrorBody, TaskError};
use crate::task::{MessageDraft, Task, TaskStatus};

use super::types::{AppendResponse, CreateTaskRequest, ListTasksQuery};
use super::AppState;

/// `POST /tasks` - create a task, optionally seeding the first message.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateTaskRequest>>,
) -> (StatusCode, Json<Task>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let task = state.store.create_task(request.message).await;
    (StatusCode::CREATED, Json(task))
}

/// `GET /tasks` - list tasks, optionally filtered by status.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<Task>> {
    Json(state.store.list_tasks(query.status).await)
}

/// `GET /tasks/{id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, TaskError> {
    Ok(Json(state.store.get_task(id).await?))
}

/// `POST /tasks/{id}/cancel`
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, TaskError> {
    Ok(Json(
        state.store.update_status(id, TaskStatus::Canceled).await?,
    ))
}

/// `POST /tasks/{id}/messages` - append a message.
///
/// When the append drives a fresh task into `working`, the generation backend
/// runs synchronously and the agent's reply comes back in the response; the
/// task ends up `completed` (or `failed`). Otherwise the stored message is
/// returned as-is.
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<MessageDraft>,
) -> Result<Response, TaskError> {
    let appended = state.store.add_message(id, draft).await?;
    if !appended.started_work {
        return Ok(Json(AppendResponse::Stored {
            message: appended.message,
        })
        .into_response());
    }

    let messages = state.store.get_messages(id).await?;
    match state.backend.complete(&messages).await {
        Ok(result) => {
            let (task, reply) = state.store.complete_task(id, result).await?;
            Ok(Json(AppendResponse::Processed {
                task_id: id,
                status: task.status,
                message: reply,
            })
            .into_response())
        }
        Err(e) => {
            tracing::error!(task_id = %id, error = %e, "Generation failed");
            state.store.fail_task(id, &e.to_string()).await?;
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    error: e.to_string(),
                    kind: "backend".to_string(),
                }),
            )
                .into_response())
        }
    }
}

/// `GET /tasks/{id}/messages/stream` - subscribe to the task's generation.
pub async fn stream_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, TaskError> {
    let subscription = state.broker.open(id).await?;
    let stream_id = Uuid::new_v4();
    tracing::info!(stream_id = %stream_id, task_id = %id, "Task SSE stream opened");

    struct StreamDropGuard {
        stream_id: Uuid,
        task_id: Uuid,
    }

    impl Drop for StreamDropGuard {
        fn drop(&mut self) {
            tracing::info!(
                stream_id = %self.stream_id,
                task_id = %self.task_id,
                "Task SSE stream closed"
            );
        }
    }

    let guard = StreamDropGuard {
        stream_id,
        task_id: id,
    };

    let stream = subscription.into_events().filter_map(move |ev| {
        let _guard = &guard;
        let event = match Event::default().event(ev.event_name()).json_data(&ev) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::error!(
                    stream_id = %stream_id,
                    event = %ev.event_name(),
                    error = %e,
                    "Failed to serialize SSE event; dropping"
                );
                None
            }
        };
        async move { event }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}
