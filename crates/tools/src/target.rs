//! Tool-name resolution and default risk classification.
//!
//! The local capability set is closed: every name the model may use resolves
//! to one [`ToolTarget`] variant, and anything of the form `server:tool` is
//! forwarded to an external tool server.

use cadence_core::error::ToolError;
use cadence_core::tool::ToolDefinition;
use cadence_core::validation::{OperationType, RiskLevel};
use cadence_core::workflow::SubAgentMode;
use serde_json::json;

pub const MEMORY_TOOL: &str = "memory";
pub const TODO_TOOL: &str = "todo";
pub const CALCULATOR_TOOL: &str = "calculator";

/// Sub-agent control tools. The orchestrator routes these to its coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubAgentControl {
    Spawn,
    Delegate,
    Parallel,
    Status,
}

impl SubAgentControl {
    pub const ALL: [SubAgentControl; 4] = [Self::Spawn, Self::Delegate, Self::Parallel, Self::Status];

    pub fn name(self) -> &'static str {
        match self {
            Self::Spawn => "spawn_agent",
            Self::Delegate => "delegate_agent",
            Self::Parallel => "parallel_agents",
            Self::Status => "sub_agent_status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// The execution mode started by this control; `Status` starts nothing.
    pub fn mode(self) -> Option<SubAgentMode> {
        match self {
            Self::Spawn => Some(SubAgentMode::Spawn),
            Self::Delegate => Some(SubAgentMode::Delegate),
            Self::Parallel => Some(SubAgentMode::Parallel),
            Self::Status => None,
        }
    }

    pub fn definition(self) -> ToolDefinition {
        let single_task = json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "What the sub-agent should do" },
                "system_prompt": { "type": "string", "description": "Optional system prompt for the sub-agent" },
                "tools": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional list of tool names the sub-agent may use"
                }
            },
            "required": ["task"]
        });

        let (description, parameters) = match self {
            Self::Spawn => (
                "Start a sub-agent in the background. Returns its id immediately; completion is reported asynchronously.",
                single_task,
            ),
            Self::Delegate => (
                "Hand a task to a sub-agent and wait for its final answer.",
                single_task,
            ),
            Self::Parallel => (
                "Run several sub-agents concurrently and wait for all of them. Returns one result entry per task, in order.",
                json!({
                    "type": "object",
                    "properties": {
                        "tasks": { "type": "array", "items": single_task }
                    },
                    "required": ["tasks"]
                }),
            ),
            Self::Status => (
                "Report the status of one sub-agent, or of every sub-agent started by this workflow.",
                json!({
                    "type": "object",
                    "properties": {
                        "sub_agent_id": { "type": "string" }
                    }
                }),
            ),
        };

        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Where a tool call is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTarget {
    Memory,
    Todo,
    Calculator,
    SubAgent(SubAgentControl),
    External { server: String, tool: String },
}

impl ToolTarget {
    /// Resolve a tool name as written by the model.
    pub fn resolve(name: &str) -> Result<Self, ToolError> {
        let name = name.trim();
        match name {
            MEMORY_TOOL => return Ok(Self::Memory),
            TODO_TOOL => return Ok(Self::Todo),
            CALCULATOR_TOOL => return Ok(Self::Calculator),
            _ => {}
        }
        if let Some(control) = SubAgentControl::from_name(name) {
            return Ok(Self::SubAgent(control));
        }
        match name.split_once(':') {
            Some((server, tool)) if !server.trim().is_empty() && !tool.trim().is_empty() => {
                Ok(Self::External {
                    server: server.trim().to_string(),
                    tool: tool.trim().to_string(),
                })
            }
            _ => Err(ToolError::NotFound(name.to_string())),
        }
    }

    /// Canonical name: the local tool name or `server:tool`.
    pub fn name(&self) -> String {
        match self {
            Self::Memory => MEMORY_TOOL.to_string(),
            Self::Todo => TODO_TOOL.to_string(),
            Self::Calculator => CALCULATOR_TOOL.to_string(),
            Self::SubAgent(control) => control.name().to_string(),
            Self::External { server, tool } => format!("{server}:{tool}"),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }

    /// Default operation category and risk for a call with these arguments.
    pub fn classify(&self, arguments: &serde_json::Value) -> (OperationType, RiskLevel) {
        match self {
            Self::Calculator | Self::Todo => (OperationType::Tool, RiskLevel::Low),
            Self::Memory => {
                match arguments.get("operation").and_then(|v| v.as_str()) {
                    Some("add") => (OperationType::DbOp, RiskLevel::Medium),
                    Some("delete") | Some("clear_by_type") => (OperationType::DbOp, RiskLevel::High),
                    _ => (OperationType::Tool, RiskLevel::Low),
                }
            }
            Self::SubAgent(SubAgentControl::Status) => (OperationType::SubAgent, RiskLevel::Low),
            Self::SubAgent(SubAgentControl::Spawn | SubAgentControl::Delegate) => {
                (OperationType::SubAgent, RiskLevel::Medium)
            }
            Self::SubAgent(SubAgentControl::Parallel) => (OperationType::SubAgent, RiskLevel::High),
            Self::External { tool, .. } => {
                let lowered = tool.to_lowercase();
                let mutating = ["write", "delete", "remove", "move"]
                    .iter()
                    .any(|verb| lowered.contains(verb));
                if mutating {
                    (OperationType::FileOp, RiskLevel::High)
                } else {
                    (OperationType::ExternalTool, RiskLevel::Medium)
                }
            }
        }
    }
}
