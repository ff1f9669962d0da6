//! Ollama chat backend.
//!
//! Speaks the `/api/chat` protocol: a single JSON response when `stream` is
//! false, NDJSON fragments when true. Only text parts participate in the
//! prompt; other part kinds are opaque to the model.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::task::{Message, Role};

use super::GenerationBackend;

/// Request timeout for non-streaming completions.
const COMPLETE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(host: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }
}

/// Flatten a task conversation into chat messages. Text parts only.
fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| ChatMessage {
            role: match message.role {
                Role::User => "user",
                Role::Agent => "assistant",
            },
            content: message.text(),
        })
        .collect()
}

/// Extract the incremental content fragment from one NDJSON line.
fn fragment_from_line(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value["message"]["content"].as_str().map(|s| s.to_string())
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_chat_messages(messages),
            stream: false,
        };

        let response = self
            .client
            .post(self.chat_url())
            .timeout(COMPLETE_TIMEOUT)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Malformed("missing message.content".to_string()))
    }

    async fn stream(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_chat_messages(messages),
            stream: true,
        };

        // No overall timeout here: the stream is open-ended, and cancellation
        // comes from the subscriber side.
        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        loop {
            let bytes = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = body.next() => match next {
                    Some(bytes) => bytes?,
                    None => break,
                },
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(fragment) = fragment_from_line(line) {
                    if !fragment.is_empty() && chunks.send(fragment).await.is_err() {
                        // Subscriber went away; stop pulling from the model.
                        return Ok(());
                    }
                }
            }
        }

        // Trailing line without a newline terminator.
        let line = buffer.trim();
        if !line.is_empty() {
            if let Some(fragment) = fragment_from_line(line) {
                if !fragment.is_empty() {
                    let _ = chunks.send(fragment).await;
                }
            }
        }
        Ok(())
    }
}
