//! Agent capability descriptor ("agent card").
//!
//! A static value object served at `/.well-known/agent.json` for discovery.
//! Built from configuration, optionally overridden by a JSON file; never
//! mutated after load.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "a2a-1.0";

/// One advertised capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub skills: Vec<Skill>,
    pub version: String,
    pub protocol: String,
}

impl AgentCard {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
        skills: Vec<Skill>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            skills,
            version: version.into(),
            protocol: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Load a card from a JSON file. Missing `protocol` falls back to the
    /// version this server speaks.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut card: AgentCard = serde_json::from_str(&raw)?;
        if card.protocol.is_empty() {
            card.protocol = PROTOCOL_VERSION.to_string();
        }
        Ok(card)
    }
}
