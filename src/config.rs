//! Configuration management.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `WEBHOOK_URL` - Optional. Receiver for lifecycle notifications; unset
//!   disables the dispatcher.
//! - `WEBHOOK_TIMEOUT_SECS` - Optional. Per-delivery timeout. Defaults to `10`.
//! - `OLLAMA_HOST` - Optional. Generation backend URL; unset selects the echo
//!   backend.
//! - `OLLAMA_MODEL` - Optional. Model name. Defaults to `gemma3:27b`.
//! - `AGENT_NAME`, `AGENT_DESCRIPTION`, `AGENT_VERSION`, `AGENT_ENDPOINT` -
//!   Optional. Agent card fields.
//! - `AGENT_CARD_PATH` - Optional. JSON file overriding the whole card.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Webhook notification configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Receiver URL; None disables outbound notifications
    pub url: Option<String>,

    /// Bound on each delivery attempt
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl WebhookConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

/// Generation backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Ollama host URL; None selects the echo backend
    pub ollama_host: Option<String>,

    /// Model identifier passed to the backend
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            ollama_host: None,
            model: "gemma3:27b".to_string(),
        }
    }
}

/// Agent card configuration.
#[derive(Debug, Clone)]
pub struct CardConfig {
    pub name: String,
    pub description: String,
    pub version: String,
    /// Public endpoint advertised on the card; defaults to the bind address
    pub endpoint: Option<String>,
    /// JSON file that replaces the generated card entirely
    pub card_path: Option<PathBuf>,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            name: "Agent Exchange".to_string(),
            description: "An A2A-compatible agent".to_string(),
            version: "1.0.0".to_string(),
            endpoint: None,
            card_path: None,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Webhook notification settings
    pub webhook: WebhookConfig,

    /// Generation backend settings
    pub backend: BackendConfig,

    /// Agent card settings
    pub card: CardConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let webhook_timeout = std::env::var("WEBHOOK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("WEBHOOK_TIMEOUT_SECS".to_string(), format!("{}", e))
            })?;

        let webhook = WebhookConfig {
            url: std::env::var("WEBHOOK_URL").ok(),
            timeout: Duration::from_secs(webhook_timeout),
        };

        let backend = BackendConfig {
            ollama_host: std::env::var("OLLAMA_HOST").ok(),
            model: std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "gemma3:27b".to_string()),
        };

        let defaults = CardConfig::default();
        let card = CardConfig {
            name: std::env::var("AGENT_NAME").unwrap_or(defaults.name),
            description: std::env::var("AGENT_DESCRIPTION").unwrap_or(defaults.description),
            version: std::env::var("AGENT_VERSION").unwrap_or(defaults.version),
            endpoint: std::env::var("AGENT_ENDPOINT").ok(),
            card_path: std::env::var("AGENT_CARD_PATH").ok().map(PathBuf::from),
        };

        Ok(Self {
            host,
            port,
            webhook,
            backend,
            card,
        })
    }

    /// Endpoint advertised on the agent card.
    pub fn public_endpoint(&self) -> String {
        self.card
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    /// Create a config with defaults (useful for testing).
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            webhook: WebhookConfig::default(),
            backend: BackendConfig::default(),
            card: CardConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_endpoint_falls_back_to_bind_address() {
        let mut config = Config::for_tests();
        config.port = 8000;
        assert_eq!(config.public_endpoint(), "http://127.0.0.1:8000");

        config.card.endpoint = Some("https://agents.example.com".to_string());
        assert_eq!(config.public_endpoint(), "https://agents.example.com");
    }

    #[test]
    fn webhook_disabled_without_url() {
        let config = Config::for_tests();
        assert!(!config.webhook.is_enabled());
    }
}
