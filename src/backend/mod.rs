//! Text-generation backends.
//!
//! The lifecycle engine treats generation as an opaque collaborator: it either
//! returns one complete string, or pushes incremental fragments into a channel
//! until done. `EchoBackend` is the zero-configuration default; `ollama`
//! speaks the Ollama chat protocol.

pub mod ollama;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::task::{Message, Role};

pub use ollama::OllamaBackend;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Produce the complete reply for a conversation.
    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError>;

    /// Produce the reply incrementally, pushing fragments into `chunks`.
    ///
    /// Implementations stop promptly when `cancel` fires or the receiver is
    /// dropped; the concatenation of pushed fragments equals the text a
    /// `complete` call would have returned.
    async fn stream(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError>;
}

/// Fallback backend used when no generation host is configured: replies with
/// the latest user message's text.
pub struct EchoBackend;

impl EchoBackend {
    fn reply(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for EchoBackend {
    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError> {
        Ok(Self::reply(messages))
    }

    async fn stream(
        &self,
        messages: &[Message],
        chunks: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), BackendError> {
        let reply = Self::reply(messages);
        for word in split_chunks(&reply) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if chunks.send(word).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Split a reply into word-sized fragments, whitespace attached to the
/// preceding word so concatenation reproduces the input exactly.
fn split_chunks(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn convo() -> Vec<Message> {
        let task_id = Uuid::new_v4();
        vec![Message {
            id: Uuid::new_v4(),
            task_id,
            role: Role::User,
            parts: vec![crate::task::Part::Text("hello streaming world".to_string())],
            timestamp: Utc::now(),
        }]
    }

    #[test]
    fn split_chunks_round_trips() {
        let text = "hello  streaming\nworld";
        assert_eq!(split_chunks(text).concat(), text);
        assert!(split_chunks("").is_empty());
    }

    #[tokio::test]
    async fn echo_complete_returns_latest_user_text() {
        let reply = EchoBackend.complete(&convo()).await.unwrap();
        assert_eq!(reply, "hello streaming world");
    }

    #[tokio::test]
    async fn echo_stream_concatenates_to_complete() {
        let (tx, mut rx) = mpsc::channel(16);
        EchoBackend
            .stream(&convo(), tx, CancellationToken::new())
            .await
            .unwrap();
        let mut collected = String::new();
        while let Some(chunk) = rx.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, "hello streaming world");
    }
}
