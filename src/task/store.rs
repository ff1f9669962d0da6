//! In-memory task store (non-persistent).
//!
//! Owns the authoritative status of every task and its message log. The outer
//! map lock is held only to insert or look up a task entry; every mutation
//! serializes on that task's own lock, so tasks proceed independently. Reads
//! return cloned snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::error::TaskError;
use crate::notify::TaskEvent;
use crate::task::{Message, MessageDraft, Role, Task, TaskStatus};

/// Capacity of the lifecycle event channel. Consumers that fall further
/// behind than this see a lag notice and continue with newer events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of appending a message.
#[derive(Debug, Clone)]
pub struct Appended {
    /// The stored message, with id and timestamp assigned.
    pub message: Message,
    /// Whether this append drove the task from `submitted` to `working`.
    pub started_work: bool,
}

#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Arc<RwLock<Task>>>>>,
    events_tx: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
        }
    }

    /// Subscribe to lifecycle events (task created, status changed, message
    /// added, terminal). Events for one task arrive in mutation order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No receivers is fine (no webhook configured, no test listener).
        let _ = self.events_tx.send(event);
    }

    async fn entry(&self, id: Uuid) -> Result<Arc<RwLock<Task>>, TaskError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TaskError::TaskNotFound(id))
    }

    /// Create a task with status `submitted`, optionally seeding the log.
    pub async fn create_task(&self, initial_message: Option<MessageDraft>) -> Task {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut task = Task {
            id,
            status: TaskStatus::Submitted,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            result: None,
        };
        if let Some(draft) = initial_message {
            task.messages.push(draft.into_message(id, now));
        }
        self.tasks
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(task.clone())));
        tracing::debug!(task_id = %id, "Task created");
        self.emit(TaskEvent::Created { task: task.clone() });
        task
    }

    /// Snapshot of a task, messages included.
    pub async fn get_task(&self, id: Uuid) -> Result<Task, TaskError> {
        let entry = self.entry(id).await?;
        let task = entry.read().await.clone();
        Ok(task)
    }

    /// All tasks, newest first, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let entries: Vec<Arc<RwLock<Task>>> =
            self.tasks.read().await.values().cloned().collect();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let task = entry.read().await.clone();
            if status.map_or(true, |s| task.status == s) {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks
    }

    /// Apply a status transition, enforcing the lifecycle graph.
    ///
    /// Attempts from a terminal status (or any other illegal edge) fail with
    /// `InvalidTransition` and leave the task untouched, `updated_at`
    /// included.
    pub async fn update_status(&self, id: Uuid, new: TaskStatus) -> Result<Task, TaskError> {
        let entry = self.entry(id).await?;
        let mut task = entry.write().await;
        if !task.status.can_transition_to(new) {
            return Err(TaskError::InvalidTransition {
                from: task.status,
                to: new,
            });
        }
        let from = task.status;
        task.status = new;
        task.updated_at = Utc::now();
        tracing::info!(task_id = %id, %from, to = %new, "Task status changed");
        self.emit(status_event(&task, None));
        Ok(task.clone())
    }

    /// Append a message to a task's log.
    ///
    /// Assigns id (when the caller omitted one) and a non-decreasing
    /// timestamp. The first `user` message on a `submitted` task drives it to
    /// `working`.
    pub async fn add_message(
        &self,
        task_id: Uuid,
        draft: MessageDraft,
    ) -> Result<Appended, TaskError> {
        let entry = self.entry(task_id).await?;
        let mut task = entry.write().await;
        if task.status.is_terminal() {
            return Err(TaskError::InvalidState {
                id: task_id,
                status: task.status,
            });
        }

        let message = draft.into_message(task_id, next_timestamp(&task));
        task.messages.push(message.clone());
        task.updated_at = message.timestamp;
        self.emit(TaskEvent::MessageAdded {
            task_id,
            status: task.status,
            message: message.clone(),
        });

        let started_work =
            message.role == Role::User && task.status == TaskStatus::Submitted;
        if started_work {
            task.status = TaskStatus::Working;
            task.updated_at = Utc::now();
            tracing::info!(task_id = %task_id, "Task started working");
            self.emit(status_event(&task, None));
        }

        Ok(Appended {
            message,
            started_work,
        })
    }

    /// Ordered message log for a task.
    pub async fn get_messages(&self, task_id: Uuid) -> Result<Vec<Message>, TaskError> {
        Ok(self.get_task(task_id).await?.messages)
    }

    /// Point lookup of one message.
    pub async fn get_message(
        &self,
        task_id: Uuid,
        message_id: Uuid,
    ) -> Result<Message, TaskError> {
        self.get_task(task_id)
            .await?
            .messages
            .into_iter()
            .find(|m| m.id == message_id)
            .ok_or(TaskError::MessageNotFound(message_id, task_id))
    }

    /// Record a successful generation: append the agent reply, set the final
    /// result, and move `working -> completed` in one per-task critical
    /// section.
    pub async fn complete_task(
        &self,
        id: Uuid,
        result: impl Into<String>,
    ) -> Result<(Task, Message), TaskError> {
        let entry = self.entry(id).await?;
        let mut task = entry.write().await;
        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Err(TaskError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Completed,
            });
        }

        let result = result.into();
        let mut reply = Message::agent_text(id, result.clone());
        reply.timestamp = next_timestamp(&task);
        task.messages.push(reply.clone());
        self.emit(TaskEvent::MessageAdded {
            task_id: id,
            status: task.status,
            message: reply.clone(),
        });

        task.result = Some(result);
        task.status = TaskStatus::Completed;
        task.updated_at = Utc::now();
        tracing::info!(task_id = %id, "Task completed");
        self.emit(status_event(&task, None));
        Ok((task.clone(), reply))
    }

    /// Record a failed generation: move to `failed`, carrying the reason in
    /// the lifecycle event.
    pub async fn fail_task(&self, id: Uuid, reason: &str) -> Result<Task, TaskError> {
        let entry = self.entry(id).await?;
        let mut task = entry.write().await;
        if !task.status.can_transition_to(TaskStatus::Failed) {
            return Err(TaskError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Failed,
            });
        }
        task.status = TaskStatus::Failed;
        task.updated_at = Utc::now();
        tracing::warn!(task_id = %id, reason, "Task failed");
        self.emit(status_event(&task, Some(reason.to_string())));
        Ok(task.clone())
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle event for a freshly written status. Terminal statuses get their
/// own event name so each trigger maps to exactly one outbound notification.
fn status_event(task: &Task, reason: Option<String>) -> TaskEvent {
    match task.status {
        TaskStatus::Completed => TaskEvent::Completed {
            task_id: task.id,
            result: task.result.clone(),
            timestamp: task.updated_at,
        },
        TaskStatus::Failed => TaskEvent::Failed {
            task_id: task.id,
            reason: reason.unwrap_or_default(),
            timestamp: task.updated_at,
        },
        TaskStatus::Canceled => TaskEvent::Canceled {
            task_id: task.id,
            timestamp: task.updated_at,
        },
        _ => TaskEvent::StatusChanged {
            task_id: task.id,
            status: task.status,
            timestamp: task.updated_at,
        },
    }
}

/// Append timestamp: wall clock, clamped so the per-task sequence never goes
/// backwards.
fn next_timestamp(task: &Task) -> chrono::DateTime<Utc> {
    let now = Utc::now();
    match task.messages.last() {
        Some(last) if last.timestamp > now => last.timestamp,
        _ => now,
    }
}
