//! Message domain types.
//!
//! Messages are append-only within a workflow's history. Tool observations
//! are fed back to the model as `user` messages flagged in their metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (and tool observations fed back to the model)
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

/// Token, cost and latency figures attached to a model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A single message in a workflow's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional usage metrics (model responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MessageMetrics>,

    /// Optional metadata (observation flags, tool names, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metrics: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool observation message.
    ///
    /// The body is wrapped in a `<tool_result>` block so the model can tell
    /// it apart from real user input.
    pub fn observation(tool: &str, success: bool, body: &str) -> Self {
        let status = if success { "success" } else { "error" };
        let mut msg = Self::user(format!(
            "<tool_result name=\"{tool}\" status=\"{status}\">\n{body}\n</tool_result>"
        ));
        msg.metadata.insert("observation".into(), serde_json::Value::Bool(true));
        msg.metadata.insert("tool".into(), serde_json::Value::String(tool.to_string()));
        msg.metadata.insert("success".into(), serde_json::Value::Bool(success));
        msg
    }

    /// Attach usage metrics.
    pub fn with_metrics(mut self, metrics: MessageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether this message is a tool observation.
    pub fn is_observation(&self) -> bool {
        self.metadata
            .get("observation")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
