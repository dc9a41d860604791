//! Workflow and sub-agent domain types.
//!
//! A [`Workflow`] is one conversational loop driven by the orchestrator.
//! Its status only moves forward through checked transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Message;

/// Identifier of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Idle, Cancelled)
                | (Idle, Error)
                | (Running, Completed)
                | (Running, Error)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,

    /// The agent this workflow runs on behalf of
    pub agent_id: String,

    pub status: WorkflowStatus,

    /// Number of model calls made so far
    pub iteration: u32,

    /// Conversation history, append-only
    pub messages: Vec<Message>,

    /// Set when this workflow is a nested sub-agent run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<WorkflowId>,

    /// Recursion depth (0 for top-level workflows)
    #[serde(default)]
    pub depth: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an idle top-level workflow.
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            agent_id: agent_id.into(),
            status: WorkflowStatus::Idle,
            iteration: 0,
            messages: Vec::new(),
            parent_id: None,
            depth: 0,
            final_answer: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark this workflow as a nested run under `parent`.
    pub fn with_parent(mut self, parent: WorkflowId, depth: u32) -> Self {
        self.parent_id = Some(parent);
        self.depth = depth;
        self
    }

    pub fn with_id(mut self, id: WorkflowId) -> Self {
        self.id = id;
        self
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Running)
    }

    pub fn complete(&mut self, answer: impl Into<String>) -> Result<()> {
        self.transition(WorkflowStatus::Completed)?;
        self.final_answer = Some(answer.into());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkflowStatus::Error)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Cancelled)?;
        self.error = Some("cancelled".into());
        Ok(())
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The most recent non-observation user message, if any.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::User && !m.is_observation())
    }
}

/// How a sub-agent was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentMode {
    /// Runs concurrently, parent does not wait
    Spawn,
    /// Parent waits for the single result
    Delegate,
    /// One member of a joined group
    Parallel,
}

/// Lifecycle state of a sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl SubAgentStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Figures recorded when a sub-agent finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentMetrics {
    pub iterations: u32,
    pub tool_calls: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub duration_ms: u64,
}

/// A nested orchestration run tracked by its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSubAgent {
    pub id: String,
    pub parent_workflow_id: WorkflowId,

    /// The nested workflow executing the task
    pub workflow_id: WorkflowId,

    pub task: String,
    pub mode: SubAgentMode,
    pub status: SubAgentStatus,

    /// 0-100
    pub progress: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SubAgentMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActiveSubAgent {
    pub fn new(parent: WorkflowId, task: impl Into<String>, mode: SubAgentMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_workflow_id: parent,
            workflow_id: WorkflowId::new(),
            task: task.into(),
            mode,
            status: SubAgentStatus::Pending,
            progress: 0,
            metrics: None,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut wf = Workflow::new("agent-1");
        assert_eq!(wf.status, WorkflowStatus::Idle);
        wf.start().unwrap();
        wf.complete("42").unwrap();
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.final_answer.as_deref(), Some("42"));
    }

    #[test]
    fn terminal_state_rejects_transitions() {
        let mut wf = Workflow::new("agent-1");
        wf.start().unwrap();
        wf.fail("max iterations").unwrap();
        let err = wf.start().unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(wf.cancel().is_err());
        assert_eq!(wf.error.as_deref(), Some("max iterations"));
    }

    #[test]
    fn idle_can_be_cancelled_but_not_completed() {
        let mut wf = Workflow::new("agent-1");
        assert!(wf.complete("x").is_err());
        wf.cancel().unwrap();
        assert!(wf.is_terminal());
    }

    #[test]
    fn last_user_message_skips_observations() {
        let mut wf = Workflow::new("agent-1");
        wf.push_message(Message::user("what is 2+2?"));
        wf.push_message(Message::assistant("<tool_call>...</tool_call>"));
        wf.push_message(Message::observation("calculator", true, "4"));
        assert_eq!(wf.last_user_message().unwrap().content, "what is 2+2?");
    }

    #[test]
    fn workflow_id_serializes_as_plain_string() {
        let id = WorkflowId::from("wf-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""wf-1""#);
        assert_eq!(id.to_string(), "wf-1");
    }

    #[test]
    fn sub_agent_starts_pending() {
        let sa = ActiveSubAgent::new(WorkflowId::from("parent"), "summarize", SubAgentMode::Delegate);
        assert_eq!(sa.status, SubAgentStatus::Pending);
        assert_eq!(sa.progress, 0);
        assert_ne!(sa.workflow_id, sa.parent_workflow_id);
    }
}
