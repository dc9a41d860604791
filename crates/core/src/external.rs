//! External tool server contract.
//!
//! Tools named `server:tool` are forwarded to an [`ExternalToolServer`].
//! Only the call/response contract matters here; the server process
//! lifecycle is managed elsewhere. Callers bound every call by a timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A tool advertised by an external server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolInfo {
    pub server: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ExternalToolInfo {
    /// The `server:tool` name the model uses.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.server, self.name)
    }
}

#[async_trait]
pub trait ExternalToolServer: Send + Sync {
    /// Invoke `tool` on `server`.
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Every tool currently available across servers.
    async fn list_tools(&self) -> std::result::Result<Vec<ExternalToolInfo>, ToolError>;
}
