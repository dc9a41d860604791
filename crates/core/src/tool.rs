//! Tool trait — the abstraction over local agent capabilities.
//!
//! Local tools (memory, todo, calculator) implement [`Tool`]. Every dispatch,
//! local or external, is recorded as an immutable [`ToolExecution`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolError;
use crate::event::EventOrigin;
use crate::workflow::WorkflowId;

/// A tool invocation parsed out of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID
    pub id: String,

    /// Name of the tool to execute (local name or `server:tool`)
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (shown to the model)
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// Successful result whose text is the pretty-printed JSON payload.
    pub fn json(data: serde_json::Value) -> Self {
        let output = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        Self {
            success: true,
            output,
            data: Some(data),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// Description of a tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Per-call context handed to local tools.
///
/// Carries the caller's workflow explicitly; tools hold no scope state.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workflow_id: WorkflowId,
    pub iteration: u32,
    /// Set when the calling workflow is a sub-agent
    pub sub_agent_id: Option<String>,
    pub parent_workflow_id: Option<WorkflowId>,
}

impl ToolContext {
    pub fn new(workflow_id: WorkflowId, iteration: u32) -> Self {
        Self {
            workflow_id,
            iteration,
            sub_agent_id: None,
            parent_workflow_id: None,
        }
    }

    /// Event origin for events a tool publishes on behalf of the caller.
    pub fn origin(&self) -> EventOrigin {
        match (&self.sub_agent_id, &self.parent_workflow_id) {
            (Some(agent), Some(parent)) => {
                EventOrigin::nested(self.workflow_id.clone(), agent.clone(), parent.clone())
            }
            _ => EventOrigin::workflow(self.workflow_id.clone()),
        }
    }
}

/// Immutable record of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: String,
    pub workflow_id: WorkflowId,

    /// Local name or `server:tool`
    pub tool: String,

    pub input: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
}

impl ToolExecution {
    /// The text fed back to the model for this execution.
    pub fn observation_text(&self) -> String {
        if let Some(err) = &self.error {
            return err.clone();
        }
        match &self.output {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }
}

/// The core Tool trait for local handlers.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "memory", "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for the prompt.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            ctx: &ToolContext,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("missing text".into()))?;
            Ok(ToolResult::ok(format!("{}: {text}", ctx.workflow_id)))
        }
    }

    #[tokio::test]
    async fn tool_receives_context() {
        let ctx = ToolContext::new(WorkflowId::from("wf-9"), 1);
        let result = EchoTool
            .execute(&ctx, serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "wf-9: hello");
    }

    #[tokio::test]
    async fn tool_reports_bad_arguments() {
        let ctx = ToolContext::new(WorkflowId::from("wf-9"), 1);
        let err = EchoTool.execute(&ctx, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn definition_uses_schema() {
        let def = EchoTool.to_definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.parameters["required"][0], "text");
    }

    #[test]
    fn observation_text_prefers_error() {
        let exec = ToolExecution {
            id: "x".into(),
            workflow_id: WorkflowId::from("wf"),
            tool: "calculator".into(),
            input: serde_json::json!({"expression": "1/0"}),
            output: None,
            success: false,
            error: Some("Division by zero".into()),
            duration_ms: 0,
            iteration: 1,
            created_at: Utc::now(),
        };
        assert_eq!(exec.observation_text(), "Division by zero");
    }

    #[test]
    fn json_result_keeps_data() {
        let r = ToolResult::json(serde_json::json!({"count": 2}));
        assert!(r.output.contains("\"count\": 2"));
        assert_eq!(r.data.unwrap()["count"], 2);
    }
}
