//! HTTP API for task exchange, discovery, and streaming.

pub mod rpc;
pub mod tasks;
pub mod types;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::backend::{EchoBackend, GenerationBackend, OllamaBackend};
use crate::card::AgentCard;
use crate::config::Config;
use crate::notify::{NotificationDispatcher, WebhookSink};
use crate::stream::StreamBroker;
use crate::task::TaskStore;

use self::types::HealthResponse;

/// Shared state handed to every handler.
pub struct AppState {
    pub store: TaskStore,
    pub broker: StreamBroker,
    pub backend: Arc<dyn GenerationBackend>,
    pub card: AgentCard,
    /// Present only when a webhook receiver is configured
    pub dispatcher: Option<NotificationDispatcher>,
}

impl AppState {
    /// Wire up the engine from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let card = match &config.card.card_path {
            Some(path) => AgentCard::from_file(path)?,
            None => AgentCard::new(
                config.card.name.clone(),
                config.card.description.clone(),
                config.public_endpoint(),
                Vec::new(),
                config.card.version.clone(),
            ),
        };

        let backend: Arc<dyn GenerationBackend> = match &config.backend.ollama_host {
            Some(host) => {
                tracing::info!(host = %host, model = %config.backend.model, "Using Ollama backend");
                Arc::new(OllamaBackend::new(host.clone(), config.backend.model.clone()))
            }
            None => {
                tracing::info!("No generation host configured; using echo backend");
                Arc::new(EchoBackend)
            }
        };

        let store = TaskStore::new();
        let dispatcher = config.webhook.url.as_ref().map(|url| {
            tracing::info!(url = %url, "Webhook notifications enabled");
            NotificationDispatcher::spawn(
                store.subscribe_events(),
                Arc::new(WebhookSink::new(url.clone(), config.webhook.timeout)),
            )
        });
        let broker = StreamBroker::new(store.clone(), Arc::clone(&backend));

        Ok(Self {
            store,
            broker,
            backend,
            card,
            dispatcher,
        })
    }
}

/// Build the router over a prepared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/agent.json", get(agent_card))
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/tasks/:id", get(tasks::get_task))
        .route("/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/tasks/:id/messages", post(tasks::add_message))
        .route("/tasks/:id/messages/stream", get(tasks::stream_messages))
        .route("/rpc", post(rpc::handle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and run until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config)?);
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn agent_card(State(state): State<Arc<AppState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    /// Bind an ephemeral port with the default (echo-backend) config.
    async fn spawn_server() -> String {
        let config = Config::for_tests();
        let state = Arc::new(AppState::from_config(&config).expect("state"));
        let app = router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn create_message_poll_round_trip() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        // Create with an empty body.
        let resp = client
            .post(format!("{}/tasks", base))
            .send()
            .await
            .expect("create");
        assert_eq!(resp.status(), 201);
        let task: Value = resp.json().await.expect("task json");
        assert_eq!(task["status"], "submitted");
        assert!(task["messages"].as_array().expect("messages").is_empty());
        let id = task["id"].as_str().expect("id").to_string();

        // First user message triggers synchronous processing; the echo
        // backend replies with the same text.
        let resp = client
            .post(format!("{}/tasks/{}/messages", base, id))
            .json(&json!({
                "role": "user",
                "parts": [{"type": "text", "content": "hello"}]
            }))
            .send()
            .await
            .expect("append");
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.expect("append json");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["message"]["role"], "agent");

        // Polling shows the settled task.
        let task: Value = client
            .get(format!("{}/tasks/{}", base, id))
            .send()
            .await
            .expect("poll")
            .json()
            .await
            .expect("poll json");
        assert_eq!(task["status"], "completed");
        assert_eq!(task["result"], "hello");
        assert_eq!(task["messages"].as_array().expect("messages").len(), 2);

        // Appending to the settled task is a structured conflict.
        let resp = client
            .post(format!("{}/tasks/{}/messages", base, id))
            .json(&json!({
                "role": "user",
                "parts": [{"type": "text", "content": "too late"}]
            }))
            .send()
            .await
            .expect("late append");
        assert_eq!(resp.status(), 409);
        let err: Value = resp.json().await.expect("error json");
        assert_eq!(err["kind"], "invalid_state");
    }

    #[tokio::test]
    async fn unknown_task_is_a_structured_not_found() {
        let base = spawn_server().await;
        let resp = reqwest::get(format!("{}/tasks/{}", base, uuid::Uuid::new_v4()))
            .await
            .expect("get");
        assert_eq!(resp.status(), 404);
        let err: Value = resp.json().await.expect("error json");
        assert_eq!(err["kind"], "not_found");
    }

    #[tokio::test]
    async fn cancel_endpoint_follows_the_lifecycle_graph() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let task: Value = client
            .post(format!("{}/tasks", base))
            .send()
            .await
            .expect("create")
            .json()
            .await
            .expect("task json");
        let id = task["id"].as_str().expect("id").to_string();

        let resp = client
            .post(format!("{}/tasks/{}/cancel", base, id))
            .send()
            .await
            .expect("cancel");
        assert_eq!(resp.status(), 200);
        let task: Value = resp.json().await.expect("canceled json");
        assert_eq!(task["status"], "canceled");

        // Canceling a terminal task is an invalid transition.
        let resp = client
            .post(format!("{}/tasks/{}/cancel", base, id))
            .send()
            .await
            .expect("cancel again");
        assert_eq!(resp.status(), 409);
        let err: Value = resp.json().await.expect("error json");
        assert_eq!(err["kind"], "invalid_transition");
    }

    #[tokio::test]
    async fn agent_card_is_served_for_discovery() {
        let base = spawn_server().await;
        let card: Value = reqwest::get(format!("{}/.well-known/agent.json", base))
            .await
            .expect("card")
            .json()
            .await
            .expect("card json");
        assert_eq!(card["protocol"], "a2a-1.0");
        assert!(card["name"].is_string());
        assert!(card["skills"].is_array());
    }

    #[tokio::test]
    async fn sse_stream_carries_the_whole_generation() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let task: Value = client
            .post(format!("{}/tasks", base))
            .json(&json!({
                "message": {
                    "role": "user",
                    "parts": [{"type": "text", "content": "tell me a story"}]
                }
            }))
            .send()
            .await
            .expect("create")
            .json()
            .await
            .expect("task json");
        let id = task["id"].as_str().expect("id").to_string();

        // The echo backend is finite, so the SSE body ends after the
        // terminal event.
        let body = client
            .get(format!("{}/tasks/{}/messages/stream", base, id))
            .send()
            .await
            .expect("stream")
            .text()
            .await
            .expect("stream body");

        let events: Vec<(&str, Value)> = parse_sse(&body);
        assert_eq!(events.first().expect("started").0, "started");
        assert_eq!(events.last().expect("terminal").0, "completed");

        let mut concatenated = String::new();
        for (name, data) in &events[1..events.len() - 1] {
            assert_eq!(*name, "chunk");
            concatenated.push_str(data["content"].as_str().expect("content"));
        }
        assert_eq!(
            events.last().expect("terminal").1["result"],
            Value::String(concatenated)
        );

        let task: Value = client
            .get(format!("{}/tasks/{}", base, id))
            .send()
            .await
            .expect("poll")
            .json()
            .await
            .expect("poll json");
        assert_eq!(task["status"], "completed");
    }

    #[tokio::test]
    async fn rpc_mirrors_the_path_surface() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        let rpc = |method: &str, params: Value| {
            let client = client.clone();
            let url = format!("{}/rpc", base);
            let body = json!({"method": method, "params": params});
            async move {
                client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .expect("rpc send")
                    .json::<Value>()
                    .await
                    .expect("rpc json")
            }
        };

        let card = rpc("discovery", json!({})).await;
        assert_eq!(card["protocol"], "a2a-1.0");

        let created = rpc("create_task", json!({})).await;
        let id = created["task_id"].as_str().expect("task_id").to_string();

        let message = rpc(
            "add_message",
            json!({
                "task_id": id,
                "message": {"role": "user", "parts": [{"type": "text", "content": "ping"}]}
            }),
        )
        .await;
        assert!(message["id"].is_string());

        let processed = rpc("process_task", json!({"task_id": id})).await;
        assert_eq!(processed["status"], "completed");
        assert_eq!(processed["message"]["parts"][0]["content"], "ping");

        let unknown = rpc("frobnicate", json!({})).await;
        assert!(unknown["error"]
            .as_str()
            .expect("error")
            .contains("Unknown method"));
    }

    /// Minimal SSE parser: pairs each `event:` line with its `data:` JSON.
    fn parse_sse(body: &str) -> Vec<(&str, Value)> {
        let mut events = Vec::new();
        let mut current: Option<&str> = None;
        for line in body.lines() {
            if let Some(name) = line.strip_prefix("event: ") {
                current = Some(name.trim());
            } else if let Some(data) = line.strip_prefix("data: ") {
                if let Some(name) = current.take() {
                    let value = serde_json::from_str(data).unwrap_or(Value::Null);
                    events.push((name, value));
                }
            }
        }
        events
    }
}
