//! SSE streaming of in-flight generation.
//!
//! One subscription drives one generation: the backend pushes fragments into
//! a channel, the broker forwards them to the subscriber with sequence
//! numbers, and the terminal store write (`completed`/`failed`) goes through
//! the normal state-machine path. Dropping the subscription cancels the
//! generation; a still-working task is then released as `canceled`.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::GenerationBackend;
use crate::error::TaskError;
use crate::task::{TaskStatus, TaskStore};

/// Buffered fragments between the generation worker and a slow subscriber.
const CHUNK_BUFFER: usize = 32;

/// One event on a stream subscription, in protocol order:
/// `started`, zero or more `chunk`s, then exactly one `completed` or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Started {
        task_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    Chunk {
        seq: u64,
        content: String,
    },
    Completed {
        task_id: Uuid,
        result: String,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Started { .. } => "started",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Completed { .. } => "completed",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// How a generation run ended, as reported to the subscriber.
#[derive(Debug)]
enum Outcome {
    Completed { result: String },
    Failed { reason: String },
}

/// Serves stream subscriptions for tasks whose generation is in progress.
#[derive(Clone)]
pub struct StreamBroker {
    store: TaskStore,
    backend: Arc<dyn GenerationBackend>,
}

impl StreamBroker {
    pub fn new(store: TaskStore, backend: Arc<dyn GenerationBackend>) -> Self {
        Self { store, backend }
    }

    /// Validate the task, start its generation, and return the subscription.
    ///
    /// A `submitted` or `input-required` task is first moved to `working`;
    /// a terminal task is refused before any event is produced.
    pub async fn open(&self, task_id: Uuid) -> Result<Subscription, TaskError> {
        let task = self.store.get_task(task_id).await?;
        let task = match task.status {
            TaskStatus::Working => task,
            TaskStatus::Submitted | TaskStatus::InputRequired => {
                self.store.update_status(task_id, TaskStatus::Working).await?
            }
            status => {
                return Err(TaskError::InvalidState { id: task_id, status });
            }
        };

        let cancel = CancellationToken::new();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let store = self.store.clone();
        let backend = Arc::clone(&self.backend);
        let messages = task.messages.clone();
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
            run_generation(store, backend, task_id, messages, chunk_tx, outcome_tx, worker_cancel)
                .await;
        });

        Ok(Subscription {
            task_id,
            started_at: Utc::now(),
            chunks: chunk_rx,
            outcome: outcome_rx,
            cancel,
        })
    }
}

/// Drive one generation run and write its terminal state to the store.
async fn run_generation(
    store: TaskStore,
    backend: Arc<dyn GenerationBackend>,
    task_id: Uuid,
    messages: Vec<crate::task::Message>,
    chunk_tx: mpsc::Sender<String>,
    outcome_tx: oneshot::Sender<Outcome>,
    cancel: CancellationToken,
) {
    // Tee fragments: forward to the subscriber while accumulating the full
    // text, so the recorded result always equals the chunk concatenation.
    let (backend_tx, mut backend_rx) = mpsc::channel::<String>(CHUNK_BUFFER);
    let backend_cancel = cancel.clone();
    let generation = tokio::spawn(async move {
        backend.stream(&messages, backend_tx, backend_cancel).await
    });

    let mut collected = String::new();
    while let Some(fragment) = backend_rx.recv().await {
        collected.push_str(&fragment);
        if chunk_tx.send(fragment).await.is_err() {
            // Subscriber disconnected mid-stream.
            cancel.cancel();
            break;
        }
    }
    // Drain whatever the backend still pushed after cancellation so its
    // sender never blocks; content past this point is discarded.
    backend_rx.close();

    let backend_result = match generation.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Generation worker panicked");
            Err(crate::error::BackendError::Other("generation worker crashed".to_string()))
        }
    };

    if cancel.is_cancelled() {
        // No events after cancellation; release the task if still running.
        match store.update_status(task_id, TaskStatus::Canceled).await {
            Ok(_) => tracing::info!(task_id = %task_id, "Generation canceled by subscriber"),
            Err(_) => tracing::debug!(task_id = %task_id, "Cancellation observed on settled task"),
        }
        return;
    }

    match backend_result {
        Ok(()) => {
            if let Err(e) = store.complete_task(task_id, collected.clone()).await {
                tracing::warn!(task_id = %task_id, error = %e, "Could not record completion");
            }
            let _ = outcome_tx.send(Outcome::Completed { result: collected });
        }
        Err(e) => {
            let reason = e.to_string();
            if let Err(e) = store.fail_task(task_id, &reason).await {
                tracing::warn!(task_id = %task_id, error = %e, "Could not record failure");
            }
            let _ = outcome_tx.send(Outcome::Failed { reason });
        }
    }
}

/// One subscriber's view of an in-flight generation.
#[derive(Debug)]
pub struct Subscription {
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    chunks: mpsc::Receiver<String>,
    outcome: oneshot::Receiver<Outcome>,
    cancel: CancellationToken,
}

impl Subscription {
    /// The ordered event sequence. Dropping the stream before the terminal
    /// event cancels the underlying generation.
    pub fn into_events(self) -> impl Stream<Item = StreamEvent> {
        let Subscription {
            task_id,
            started_at,
            mut chunks,
            outcome,
            cancel,
        } = self;
        let guard = CancelOnDrop(cancel);

        async_stream::stream! {
            let _guard = guard;
            yield StreamEvent::Started { task_id, timestamp: started_at };

            let mut seq = 0u64;
            while let Some(content) = chunks.recv().await {
                seq += 1;
                yield StreamEvent::Chunk { seq, content };
            }

            match outcome.await {
                Ok(Outcome::Completed { result }) => {
                    yield StreamEvent::Completed { task_id, result };
                }
                Ok(Outcome::Failed { reason }) => {
                    yield StreamEvent::Error { message: reason };
                }
                // Worker gone without a verdict; still a surfaced error,
                // never a silent close.
                Err(_) => {
                    yield StreamEvent::Error {
                        message: "generation ended unexpectedly".to_string(),
                    };
                }
            }
        }
    }
}

struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
