//! Agent capability set wire types — the shape a concrete agent's responses
//! take, not the agent implementation itself.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
    pub content: Option<String>,
}

impl AgentResponse {
    /// The text payload regardless of whether the agent populated `response`
    /// or the looser `content` alternative.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or(&self.response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}
