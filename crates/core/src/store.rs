//! Workflow persistence.
//!
//! The orchestrator writes workflows, tool executions, sub-agents and
//! validation requests through [`WorkflowStore`]. The storage engine behind
//! it is not this crate's concern; [`InMemoryWorkflowStore`] keeps
//! everything in process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::tool::ToolExecution;
use crate::validation::ValidationRequest;
use crate::workflow::{ActiveSubAgent, Workflow, WorkflowId};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow record.
    async fn save_workflow(&self, workflow: &Workflow) -> std::result::Result<(), StoreError>;

    async fn get_workflow(&self, id: &WorkflowId) -> std::result::Result<Option<Workflow>, StoreError>;

    async fn list_workflows(&self) -> std::result::Result<Vec<Workflow>, StoreError>;

    async fn record_tool_execution(&self, execution: &ToolExecution) -> std::result::Result<(), StoreError>;

    async fn tool_executions(&self, workflow_id: &WorkflowId) -> std::result::Result<Vec<ToolExecution>, StoreError>;

    /// Insert or replace a sub-agent record.
    async fn save_sub_agent(&self, sub_agent: &ActiveSubAgent) -> std::result::Result<(), StoreError>;

    async fn sub_agents(&self, parent: &WorkflowId) -> std::result::Result<Vec<ActiveSubAgent>, StoreError>;

    async fn get_sub_agent(&self, id: &str) -> std::result::Result<Option<ActiveSubAgent>, StoreError>;

    /// Insert or replace a validation request.
    async fn save_validation(&self, request: &ValidationRequest) -> std::result::Result<(), StoreError>;

    async fn validations(&self, workflow_id: &WorkflowId) -> std::result::Result<Vec<ValidationRequest>, StoreError>;
}

#[derive(Default)]
struct StoreState {
    workflows: HashMap<WorkflowId, Workflow>,
    executions: Vec<ToolExecution>,
    sub_agents: Vec<ActiveSubAgent>,
    validations: Vec<ValidationRequest>,
}

/// Process-local [`WorkflowStore`].
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T, F>(items: &mut Vec<T>, item: T, same: F)
where
    F: Fn(&T) -> bool,
{
    match items.iter_mut().find(|existing| same(existing)) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save_workflow(&self, workflow: &Workflow) -> std::result::Result<(), StoreError> {
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> std::result::Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn list_workflows(&self) -> std::result::Result<Vec<Workflow>, StoreError> {
        let state = self.state.read().await;
        let mut all: Vec<Workflow> = state.workflows.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn record_tool_execution(&self, execution: &ToolExecution) -> std::result::Result<(), StoreError> {
        self.state.write().await.executions.push(execution.clone());
        Ok(())
    }

    async fn tool_executions(&self, workflow_id: &WorkflowId) -> std::result::Result<Vec<ToolExecution>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.workflow_id == *workflow_id)
            .cloned()
            .collect())
    }

    async fn save_sub_agent(&self, sub_agent: &ActiveSubAgent) -> std::result::Result<(), StoreError> {
        let mut state = self.state.write().await;
        upsert(&mut state.sub_agents, sub_agent.clone(), |s| s.id == sub_agent.id);
        Ok(())
    }

    async fn sub_agents(&self, parent: &WorkflowId) -> std::result::Result<Vec<ActiveSubAgent>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .sub_agents
            .iter()
            .filter(|s| s.parent_workflow_id == *parent)
            .cloned()
            .collect())
    }

    async fn get_sub_agent(&self, id: &str) -> std::result::Result<Option<ActiveSubAgent>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sub_agents.iter().find(|s| s.id == id).cloned())
    }

    async fn save_validation(&self, request: &ValidationRequest) -> std::result::Result<(), StoreError> {
        let mut state = self.state.write().await;
        upsert(&mut state.validations, request.clone(), |r| r.id == request.id);
        Ok(())
    }

    async fn validations(&self, workflow_id: &WorkflowId) -> std::result::Result<Vec<ValidationRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .validations
            .iter()
            .filter(|r| r.workflow_id == *workflow_id)
            .cloned()
            .collect())
    }
}
