//! Outbound webhook notifications for task lifecycle events.
//!
//! The store publishes `TaskEvent`s on a broadcast channel; one dispatcher
//! worker turns each event into at most one POST against the configured
//! receiver. Delivery runs off the mutating caller's path: a slow or dead
//! receiver never stalls task state changes, and failures are recorded but
//! never propagated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::task::{Message, Task, TaskStatus};

/// A task lifecycle trigger, as observed by the dispatcher.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created {
        task: Task,
    },
    StatusChanged {
        task_id: Uuid,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    MessageAdded {
        task_id: Uuid,
        /// Task status at append time
        status: TaskStatus,
        message: Message,
    },
    Completed {
        task_id: Uuid,
        result: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Failed {
        task_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Canceled {
        task_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "task_created",
            TaskEvent::StatusChanged { .. } => "status_changed",
            TaskEvent::MessageAdded { .. } => "message_added",
            TaskEvent::Completed { .. } => "completed",
            TaskEvent::Failed { .. } => "failed",
            TaskEvent::Canceled { .. } => "canceled",
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            TaskEvent::Created { task } => task.id,
            TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::MessageAdded { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Canceled { task_id, .. } => *task_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskEvent::Created { task } => task.status,
            TaskEvent::StatusChanged { status, .. } => *status,
            TaskEvent::MessageAdded { status, .. } => *status,
            TaskEvent::Completed { .. } => TaskStatus::Completed,
            TaskEvent::Failed { .. } => TaskStatus::Failed,
            TaskEvent::Canceled { .. } => TaskStatus::Canceled,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::Created { task } => task.created_at,
            TaskEvent::MessageAdded { message, .. } => message.timestamp,
            TaskEvent::StatusChanged { timestamp, .. }
            | TaskEvent::Completed { timestamp, .. }
            | TaskEvent::Failed { timestamp, .. }
            | TaskEvent::Canceled { timestamp, .. } => *timestamp,
        }
    }

    /// Event-specific detail carried in the payload's `data` field.
    fn data(&self) -> serde_json::Value {
        match self {
            TaskEvent::Created { task } => json!({ "task": task }),
            TaskEvent::StatusChanged { status, .. } => json!({ "status": status }),
            TaskEvent::MessageAdded { message, .. } => json!({ "message": message }),
            TaskEvent::Completed { result, .. } => json!({ "result": result }),
            TaskEvent::Failed { reason, .. } => json!({ "reason": reason }),
            TaskEvent::Canceled { .. } => json!({}),
        }
    }

    /// Render the outbound POST body.
    pub fn payload(&self) -> WebhookPayload {
        WebhookPayload {
            task_id: self.task_id(),
            status: self.status(),
            timestamp: self.timestamp(),
            event: self.event_name().to_string(),
            data: self.data(),
        }
    }
}

/// Wire format of an outbound notification.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub data: serde_json::Value,
}

/// Why a delivery attempt failed. Internal only: logged and counted, never
/// surfaced to the caller that mutated the task.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook receiver returned {0}")]
    Status(reqwest::StatusCode),
}

/// Where notifications go. The HTTP sink is the production implementation;
/// tests substitute a recording sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryFailure>;
}

/// POSTs payloads to a fixed receiver URL with a bounded per-call timeout.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, payload: &WebhookPayload) -> Result<(), DeliveryFailure> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryFailure::Status(status));
        }
        Ok(())
    }
}

/// Background worker draining lifecycle events into a sink, one attempt per
/// event, in channel order.
pub struct NotificationDispatcher {
    deliveries: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    pub fn spawn(
        mut events: broadcast::Receiver<TaskEvent>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let deliveries = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let delivered = Arc::clone(&deliveries);
        let failed = Arc::clone(&failures);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let payload = event.payload();
                        match sink.deliver(&payload).await {
                            Ok(()) => {
                                delivered.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    task_id = %payload.task_id,
                                    event = %payload.event,
                                    "Webhook delivered"
                                );
                            }
                            Err(e) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(
                                    task_id = %payload.task_id,
                                    event = %payload.event,
                                    error = %e,
                                    "Webhook delivery failed"
                                );
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        failed.fetch_add(n, Ordering::Relaxed);
                        tracing::warn!(skipped = n, "Notification dispatcher lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Notification dispatcher stopped");
        });

        Self {
            deliveries,
            failures,
        }
    }

    /// Successful deliveries so far.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Failed delivery attempts (including events dropped on lag).
    pub fn delivery_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;
    use crate::task::{MessageDraft, TaskStore};
    use std::time::Duration;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn full_lifecycle_dispatches_one_call_per_event() {
        let store = TaskStore::new();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = NotificationDispatcher::spawn(store.subscribe_events(), sink.clone());

        let task = store.create_task(None).await;
        store
            .add_message(task.id, MessageDraft::user_text("hello"))
            .await
            .unwrap();
        store.complete_task(task.id, "hi there").await.unwrap();

        wait_until(|| dispatcher.deliveries() == 5).await;

        let payloads = sink.payloads.lock().await;
        let events: Vec<&str> = payloads.iter().map(|p| p.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "task_created",
                "message_added",
                "status_changed",
                "message_added",
                "completed"
            ]
        );
        for p in payloads.iter() {
            assert_eq!(p.task_id, task.id);
        }

        let completed = payloads.last().unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);
        assert_eq!(completed.data["result"], "hi there");
        assert_eq!(dispatcher.delivery_failures(), 0);
    }

    #[tokio::test]
    async fn failed_deliveries_are_counted_and_never_propagate() {
        let store = TaskStore::new();
        let dispatcher =
            NotificationDispatcher::spawn(store.subscribe_events(), Arc::new(FailingSink));

        // The mutating calls themselves must stay oblivious to the sink.
        let task = store.create_task(None).await;
        store
            .add_message(task.id, MessageDraft::user_text("hello"))
            .await
            .unwrap();

        wait_until(|| dispatcher.delivery_failures() == 3).await;
        assert_eq!(dispatcher.deliveries(), 0);

        let task = store.get_task(task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Working);
    }

    #[tokio::test]
    async fn failed_task_payload_carries_the_reason() {
        let store = TaskStore::new();
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = NotificationDispatcher::spawn(store.subscribe_events(), sink.clone());

        let task = store.create_task(None).await;
        store
            .add_message(task.id, MessageDraft::user_text("hello"))
            .await
            .unwrap();
        store.fail_task(task.id, "backend unreachable").await.unwrap();

        wait_until(|| dispatcher.deliveries() == 4).await;

        let payloads = sink.payloads.lock().await;
        let failed = payloads.last().unwrap();
        assert_eq!(failed.event, "failed");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.data["reason"], "backend unreachable");
    }

    #[test]
    fn payload_wire_format_is_flat() {
        let event = TaskEvent::StatusChanged {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Working,
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(event.payload()).unwrap();
        assert!(v["task_id"].is_string());
        assert_eq!(v["status"], "working");
        assert_eq!(v["event"], "status_changed");
        assert!(v["timestamp"].is_string());
        assert_eq!(v["data"]["status"], "working");
    }
}
