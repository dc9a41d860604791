//! Todo tool — a per-workflow task list the agent uses to plan its work.
//!
//! Creating, updating and completing tasks publishes `task_create`,
//! `task_update` and `task_complete` events on the caller's stream.

use async_trait::async_trait;
use cadence_core::error::ToolError;
use cadence_core::event::{EventBus, EventKind, TaskStatus};
use cadence_core::tool::{Tool, ToolContext, ToolResult};
use cadence_core::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::target::TODO_TOOL;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum TodoOperation {
    Create {
        title: String,
    },
    Update {
        task_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        status: Option<TaskStatus>,
    },
    Complete {
        task_id: String,
    },
    List,
}

/// The `todo` tool. Lists are keyed by workflow; clones share state.
#[derive(Clone)]
pub struct TodoTool {
    events: Arc<EventBus>,
    lists: Arc<RwLock<HashMap<WorkflowId, Vec<TodoItem>>>>,
}

impl TodoTool {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            lists: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshot of a workflow's tasks, in creation order.
    pub async fn items(&self, workflow_id: &WorkflowId) -> Vec<TodoItem> {
        self.lists
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn unknown_task(task_id: &str) -> ToolResult {
    ToolResult::failure(format!("No task with id '{task_id}'"))
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        TODO_TOOL
    }

    fn description(&self) -> &str {
        "Track the steps of the current task. Operations: create {title}, \
         update {task_id, title?, status?}, complete {task_id}, list."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["create", "update", "complete", "list"] },
                "title": { "type": "string" },
                "task_id": { "type": "string" },
                "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let operation: TodoOperation = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(format!("todo: {e}")))?;
        let origin = ctx.origin();

        // The lock is held across publish so task events keep list order.
        let mut lists = self.lists.write().await;
        let list = lists.entry(ctx.workflow_id.clone()).or_default();
        let now = Utc::now();

        match operation {
            TodoOperation::Create { title } => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return Err(ToolError::InvalidArguments("todo: title must not be empty".into()));
                }
                let item = TodoItem {
                    id: format!("task-{}", list.len() + 1),
                    title,
                    status: TaskStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };
                self.events.publish_from(
                    &origin,
                    EventKind::TaskCreate {
                        task_id: item.id.clone(),
                        title: item.title.clone(),
                        status: item.status,
                    },
                );
                debug!(workflow_id = %ctx.workflow_id, task_id = %item.id, "Task created");
                list.push(item.clone());
                Ok(ToolResult::json(json!(item)))
            }
            TodoOperation::Update {
                task_id,
                title,
                status,
            } => {
                let Some(item) = list.iter_mut().find(|t| t.id == task_id) else {
                    return Ok(unknown_task(&task_id));
                };
                if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
                    item.title = title;
                }
                if let Some(status) = status {
                    item.status = status;
                }
                item.updated_at = now;
                let kind = if item.status == TaskStatus::Completed {
                    EventKind::TaskComplete {
                        task_id: item.id.clone(),
                        title: item.title.clone(),
                    }
                } else {
                    EventKind::TaskUpdate {
                        task_id: item.id.clone(),
                        title: item.title.clone(),
                        status: item.status,
                    }
                };
                self.events.publish_from(&origin, kind);
                Ok(ToolResult::json(json!(item)))
            }
            TodoOperation::Complete { task_id } => {
                let Some(item) = list.iter_mut().find(|t| t.id == task_id) else {
                    return Ok(unknown_task(&task_id));
                };
                if item.status != TaskStatus::Completed {
                    item.status = TaskStatus::Completed;
                    item.updated_at = now;
                    self.events.publish_from(
                        &origin,
                        EventKind::TaskComplete {
                            task_id: item.id.clone(),
                            title: item.title.clone(),
                        },
                    );
                }
                Ok(ToolResult::json(json!(item)))
            }
            TodoOperation::List => {
                let remaining = list.iter().filter(|t| t.status != TaskStatus::Completed).count();
                Ok(ToolResult::json(json!({ "tasks": list, "remaining": remaining })))
            }
        }
    }
}
