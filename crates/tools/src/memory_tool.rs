//! Memory tool — lets the agent store, inspect and search its memories.
//!
//! Bridges the tool system with [`MemoryStore`]. The caller's workflow comes
//! from the [`ToolContext`]; an explicit `workflow_id` argument overrides it
//! for that call only.

use async_trait::async_trait;
use cadence_core::error::{MemoryError, ToolError};
use cadence_core::memory::{MemoryScope, MemoryType, ScopeFilter};
use cadence_core::tool::{Tool, ToolContext, ToolResult};
use cadence_core::workflow::WorkflowId;
use cadence_memory::{ListQuery, MemoryStore, NewMemory, ScopeQuery, SearchQuery};
use serde::Deserialize;
use serde_json::json;

use crate::target::MEMORY_TOOL;

/// One request in the memory operation schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MemoryOperation {
    Describe {
        #[serde(default)]
        scope: ScopeFilter,
        #[serde(default)]
        workflow_id: Option<WorkflowId>,
    },
    Add {
        #[serde(rename = "type")]
        memory_type: MemoryType,
        content: String,
        #[serde(default)]
        scope: Option<MemoryScope>,
        #[serde(default)]
        workflow_id: Option<WorkflowId>,
        #[serde(default)]
        importance: Option<f32>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        source: Option<String>,
    },
    List {
        #[serde(rename = "type", default)]
        memory_type: Option<MemoryType>,
        #[serde(default)]
        scope: ScopeFilter,
        #[serde(default)]
        workflow_id: Option<WorkflowId>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Search {
        query: String,
        #[serde(rename = "type", default)]
        memory_type: Option<MemoryType>,
        #[serde(default)]
        scope: ScopeFilter,
        #[serde(default)]
        workflow_id: Option<WorkflowId>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        threshold: Option<f32>,
    },
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
    ClearByType {
        #[serde(rename = "type")]
        memory_type: MemoryType,
        #[serde(default)]
        scope: ScopeFilter,
        #[serde(default)]
        workflow_id: Option<WorkflowId>,
    },
}

fn scope_query(scope: ScopeFilter, workflow_id: Option<WorkflowId>) -> ScopeQuery {
    ScopeQuery { scope, workflow_id }
}

fn memory_failure(err: MemoryError) -> ToolError {
    match err {
        MemoryError::InvalidRequest(msg) => ToolError::InvalidArguments(msg),
        other => ToolError::ExecutionFailed {
            tool_name: MEMORY_TOOL.into(),
            reason: other.to_string(),
        },
    }
}

/// The `memory` tool.
#[derive(Clone)]
pub struct MemoryTool {
    store: MemoryStore,
}

impl MemoryTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Run one parsed operation on behalf of `active`.
    pub async fn run(
        &self,
        active: &WorkflowId,
        operation: MemoryOperation,
    ) -> Result<ToolResult, MemoryError> {
        let active = Some(active);
        match operation {
            MemoryOperation::Describe { scope, workflow_id } => {
                let summary = self.store.describe(active, &scope_query(scope, workflow_id)).await?;
                Ok(ToolResult::json(json!(summary)))
            }
            MemoryOperation::Add {
                memory_type,
                content,
                scope,
                workflow_id,
                importance,
                tags,
                source,
            } => {
                let request = NewMemory {
                    scope,
                    workflow_id,
                    importance,
                    tags,
                    source,
                    ..NewMemory::new(memory_type, content)
                };
                let memory = self.store.add(active, request).await?;
                Ok(ToolResult::json(json!({
                    "id": memory.id,
                    "type": memory.memory_type,
                    "workflow_id": memory.workflow_id,
                    "expires_at": memory.expires_at,
                })))
            }
            MemoryOperation::List {
                memory_type,
                scope,
                workflow_id,
                limit,
            } => {
                let query = ListQuery {
                    scope: scope_query(scope, workflow_id),
                    memory_type,
                    limit,
                };
                let memories = self.store.list(active, &query).await?;
                Ok(ToolResult::json(json!({ "count": memories.len(), "memories": memories })))
            }
            MemoryOperation::Search {
                query,
                memory_type,
                scope,
                workflow_id,
                limit,
                threshold,
            } => {
                let search = SearchQuery {
                    query: query.clone(),
                    scope: scope_query(scope, workflow_id),
                    memory_type,
                    limit,
                    threshold,
                };
                let hits = self.store.search(active, &search).await?;
                if hits.is_empty() {
                    return Ok(ToolResult::ok(format!("No memories found matching '{query}'.")));
                }
                Ok(ToolResult::json(json!({ "count": hits.len(), "results": hits })))
            }
            MemoryOperation::Get { id } => match self.store.get(&id).await? {
                Some(memory) => Ok(ToolResult::json(json!(memory))),
                None => Ok(ToolResult::failure(format!("No memory with id '{id}'"))),
            },
            MemoryOperation::Delete { id } => {
                if self.store.delete(&id).await? {
                    Ok(ToolResult::ok(format!("Deleted memory {id}")))
                } else {
                    Ok(ToolResult::failure(format!("No memory with id '{id}'")))
                }
            }
            MemoryOperation::ClearByType {
                memory_type,
                scope,
                workflow_id,
            } => {
                let removed = self
                    .store
                    .clear_by_type(active, memory_type, &scope_query(scope, workflow_id))
                    .await?;
                Ok(ToolResult::json(json!({ "removed": removed, "type": memory_type })))
            }
        }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        MEMORY_TOOL
    }

    fn description(&self) -> &str {
        "Store and recall long-term memories. Operations: describe (summary counts), add, list, \
         search (ranked by relevance), get, delete, clear_by_type. user_pref and knowledge \
         memories are shared across workflows; context and decision memories belong to the \
         current workflow unless 'scope' says otherwise."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["describe", "add", "list", "search", "get", "delete", "clear_by_type"]
                },
                "type": {
                    "type": "string",
                    "enum": ["user_pref", "context", "knowledge", "decision"]
                },
                "content": { "type": "string", "description": "Memory text (add)" },
                "scope": {
                    "type": "string",
                    "enum": ["workflow", "general", "both"],
                    "description": "add: where to store; reads: which memories to consider (default both)"
                },
                "workflow_id": { "type": "string", "description": "Override the current workflow (rarely needed)" },
                "query": { "type": "string", "description": "Search text (search)" },
                "limit": { "type": "integer" },
                "threshold": { "type": "number", "description": "Minimum similarity 0-1 (search)" },
                "id": { "type": "string", "description": "Memory id (get, delete)" },
                "importance": { "type": "number", "description": "0-1, default 0.5 (add)" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "source": { "type": "string" }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let operation: MemoryOperation = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("memory: {e}")))?;
        self.run(&ctx.workflow_id, operation).await.map_err(memory_failure)
    }
}
