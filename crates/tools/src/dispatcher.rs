//! ToolDispatcher — routes a tool call to a local handler or an external
//! tool server and normalizes the outcome into a [`ToolExecution`].
//!
//! Failures never escape as errors: unknown tools, bad arguments, handler
//! failures and server timeouts all come back as an unsuccessful execution
//! record for the loop to observe.

use cadence_config::ToolsConfig;
use cadence_core::error::ToolError;
use cadence_core::event::EventBus;
use cadence_core::external::{ExternalToolInfo, ExternalToolServer};
use cadence_core::tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolExecution, ToolResult};
use cadence_core::validation::{OperationType, RiskLevel};
use cadence_memory::MemoryStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::calculator::CalculatorTool;
use crate::memory_tool::MemoryTool;
use crate::target::{SubAgentControl, ToolTarget};
use crate::todo::TodoTool;

/// Default external call timeout.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the immutable record of one dispatch.
pub fn execution_record(
    ctx: &ToolContext,
    call: &ToolCall,
    tool: String,
    started: Instant,
    outcome: Result<ToolResult, ToolError>,
) -> ToolExecution {
    let (output, success, error) = match outcome {
        Ok(result) if result.success => {
            let output = result.data.unwrap_or(serde_json::Value::String(result.output));
            (Some(output), true, None)
        }
        Ok(result) => (None, false, Some(result.output)),
        Err(e) => (None, false, Some(e.to_string())),
    };
    ToolExecution {
        id: call.id.clone(),
        workflow_id: ctx.workflow_id.clone(),
        tool,
        input: call.arguments.clone(),
        output,
        success,
        error,
        duration_ms: started.elapsed().as_millis() as u64,
        iteration: ctx.iteration,
        created_at: Utc::now(),
    }
}

pub struct ToolDispatcher {
    memory: MemoryTool,
    todo: TodoTool,
    calculator: CalculatorTool,
    external: Option<Arc<dyn ExternalToolServer>>,
    external_timeout: Duration,
    external_retries: u32,
    risk_overrides: HashMap<String, RiskLevel>,
}

impl ToolDispatcher {
    pub fn new(memory: MemoryStore, events: Arc<EventBus>) -> Self {
        Self {
            memory: MemoryTool::new(memory),
            todo: TodoTool::new(events),
            calculator: CalculatorTool,
            external: None,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            external_retries: 0,
            risk_overrides: HashMap::new(),
        }
    }

    pub fn with_external_server(mut self, server: Arc<dyn ExternalToolServer>) -> Self {
        self.external = Some(server);
        self
    }

    pub fn with_tools_config(mut self, config: &ToolsConfig) -> Self {
        self.external_timeout = Duration::from_secs(config.external_timeout_secs);
        self.external_retries = config.external_retries;
        self
    }

    pub fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    /// Per-tool risk that replaces the default classification.
    pub fn with_risk_overrides(mut self, overrides: HashMap<String, RiskLevel>) -> Self {
        self.risk_overrides = overrides;
        self
    }

    pub fn memory(&self) -> &MemoryTool {
        &self.memory
    }

    pub fn todo(&self) -> &TodoTool {
        &self.todo
    }

    pub fn resolve(&self, name: &str) -> Result<ToolTarget, ToolError> {
        ToolTarget::resolve(name)
    }

    /// Operation category and risk, honouring configured overrides.
    pub fn classify(&self, target: &ToolTarget, arguments: &serde_json::Value) -> (OperationType, RiskLevel) {
        let (operation, risk) = target.classify(arguments);
        match self.risk_overrides.get(&target.name()) {
            Some(risk) => (operation, *risk),
            None => (operation, risk),
        }
    }

    fn local_tools(&self) -> [&dyn Tool; 3] {
        [&self.memory, &self.todo, &self.calculator]
    }

    /// Definitions for the local tools and the sub-agent controls.
    pub fn local_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.local_tools().iter().map(|t| t.to_definition()).collect();
        defs.extend(SubAgentControl::ALL.iter().map(|c| c.definition()));
        defs
    }

    /// Tools advertised by the external server, or none if it is absent or failing.
    pub async fn external_tools(&self) -> Vec<ExternalToolInfo> {
        let Some(server) = &self.external else {
            return Vec::new();
        };
        match tokio::time::timeout(self.external_timeout, server.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                warn!(error = %e, "Listing external tools failed");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_secs = self.external_timeout.as_secs(), "Listing external tools timed out");
                Vec::new()
            }
        }
    }

    /// Full catalog: local tools, sub-agent controls, then external tools.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.local_definitions();
        defs.extend(self.external_tools().await.into_iter().map(|info| ToolDefinition {
            name: info.qualified_name(),
            description: info.description,
            parameters: info.input_schema,
        }));
        defs
    }

    /// Execute one call. Sub-agent controls are not handled here.
    pub async fn dispatch(&self, ctx: &ToolContext, call: &ToolCall) -> ToolExecution {
        let started = Instant::now();
        let target = match self.resolve(&call.name) {
            Ok(target) => target,
            Err(e) => {
                warn!(workflow_id = %ctx.workflow_id, tool = %call.name, "Unknown tool");
                return execution_record(ctx, call, call.name.clone(), started, Err(e));
            }
        };

        let outcome = self.invoke(ctx, &target, call.arguments.clone()).await;
        let execution = execution_record(ctx, call, target.name(), started, outcome);
        info!(
            workflow_id = %ctx.workflow_id,
            iteration = ctx.iteration,
            tool = %execution.tool,
            success = execution.success,
            duration_ms = execution.duration_ms,
            "Tool dispatched"
        );
        execution
    }

    async fn invoke(
        &self,
        ctx: &ToolContext,
        target: &ToolTarget,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        match target {
            ToolTarget::Memory => self.memory.execute(ctx, arguments).await,
            ToolTarget::Todo => self.todo.execute(ctx, arguments).await,
            ToolTarget::Calculator => self.calculator.execute(ctx, arguments).await,
            ToolTarget::SubAgent(control) => Err(ToolError::ExecutionFailed {
                tool_name: control.name().into(),
                reason: "sub-agent controls are handled by the orchestrator".into(),
            }),
            ToolTarget::External { server, tool } => self.call_external(server, tool, arguments).await,
        }
    }

    /// External round-trip bounded by the timeout; retried on timeout only.
    async fn call_external(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let Some(client) = &self.external else {
            return Err(ToolError::ServerUnavailable(format!(
                "no external tool server configured for '{server}'"
            )));
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = client.call_tool(server, tool, arguments.clone());
            match tokio::time::timeout(self.external_timeout, call).await {
                Ok(Ok(value)) => {
                    let output = match &value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    return Ok(ToolResult {
                        success: true,
                        output,
                        data: Some(value),
                    });
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if attempt <= self.external_retries => {
                    debug!(server, tool, attempt, "External tool timed out, retrying");
                }
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: format!("{server}:{tool}"),
                        timeout_secs: self.external_timeout.as_secs(),
                    });
                }
            }
        }
    }
}
