//! Workflow event stream.
//!
//! Every observable step of a workflow is published on the [`EventBus`] as a
//! [`StreamEvent`]. Each observer owns an unbounded channel, so publishing
//! never waits on a slow consumer and nothing is dropped or reordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::validation::{ValidationRequest, ValidationStatus};
use crate::workflow::{SubAgentMetrics, SubAgentMode, WorkflowId, WorkflowStatus};

/// State of an item on a workflow's todo list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

/// Type-specific payload of a stream event, tagged by `chunk_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chunk_type", rename_all = "snake_case")]
pub enum EventKind {
    /// Incremental model output.
    Token { content: String },

    /// Content of a `<thinking>` block.
    Reasoning { content: String },

    ToolStart {
        call_id: String,
        tool: String,
        input: serde_json::Value,
    },

    ToolEnd {
        call_id: String,
        tool: String,
        success: bool,
        output: String,
        duration_ms: u64,
    },

    SubAgentStart {
        agent: String,
        task: String,
        mode: SubAgentMode,
        nested_workflow_id: WorkflowId,
    },

    SubAgentProgress {
        agent: String,
        iteration: u32,
        progress: u8,
    },

    SubAgentComplete {
        agent: String,
        result: String,
        metrics: SubAgentMetrics,
    },

    SubAgentError { agent: String, error: String },

    TaskCreate {
        task_id: String,
        title: String,
        status: TaskStatus,
    },

    TaskUpdate {
        task_id: String,
        title: String,
        status: TaskStatus,
    },

    TaskComplete { task_id: String, title: String },

    ValidationRequired { request: ValidationRequest },

    ValidationResolved {
        request_id: String,
        status: ValidationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Terminal event; always the last one for a workflow.
    WorkflowComplete {
        status: WorkflowStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EventKind {
    /// The `chunk_type` tag of this event.
    pub fn chunk_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::SubAgentStart { .. } => "sub_agent_start",
            Self::SubAgentProgress { .. } => "sub_agent_progress",
            Self::SubAgentComplete { .. } => "sub_agent_complete",
            Self::SubAgentError { .. } => "sub_agent_error",
            Self::TaskCreate { .. } => "task_create",
            Self::TaskUpdate { .. } => "task_update",
            Self::TaskComplete { .. } => "task_complete",
            Self::ValidationRequired { .. } => "validation_required",
            Self::ValidationResolved { .. } => "validation_resolved",
            Self::WorkflowComplete { .. } => "workflow_complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowComplete { .. })
    }
}

/// Which workflow an event belongs to, plus nesting tags.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOrigin {
    pub workflow_id: WorkflowId,
    pub sub_agent_id: Option<String>,
    pub parent_workflow_id: Option<WorkflowId>,
}

impl EventOrigin {
    pub fn workflow(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            sub_agent_id: None,
            parent_workflow_id: None,
        }
    }

    pub fn nested(workflow_id: WorkflowId, sub_agent_id: String, parent: WorkflowId) -> Self {
        Self {
            workflow_id,
            sub_agent_id: Some(sub_agent_id),
            parent_workflow_id: Some(parent),
        }
    }
}

/// One event on a workflow stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub workflow_id: WorkflowId,

    /// Per-workflow, strictly increasing from 1
    pub sequence: u64,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<WorkflowId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Receiving side of an attachment.
#[derive(Debug)]
pub struct Observer {
    pub id: ObserverId,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Observer {
    /// Next event, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<StreamEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

struct Subscription {
    id: ObserverId,
    /// `None` observes every workflow
    workflow: Option<WorkflowId>,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl Subscription {
    fn wants(&self, event: &StreamEvent, parents: &HashMap<WorkflowId, WorkflowId>) -> bool {
        let Some(target) = &self.workflow else {
            return true;
        };
        // walk up the nesting chain so every ancestor sees nested events
        let mut current = Some(&event.workflow_id);
        let mut hops = 0;
        while let Some(id) = current {
            if id == target {
                return true;
            }
            hops += 1;
            if hops > parents.len() {
                break;
            }
            current = parents.get(id);
        }
        false
    }
}

/// How many closed workflow ids are remembered to reject late events.
const CLOSED_RETAINED: usize = 4096;

#[derive(Default)]
struct BusState {
    next_observer: u64,
    subscriptions: Vec<Subscription>,
    sequences: HashMap<WorkflowId, u64>,
    /// Nested workflow -> the workflow that started it
    parents: HashMap<WorkflowId, WorkflowId>,
    /// Outstanding [`StreamHold`]s per workflow
    holds: HashMap<WorkflowId, usize>,
    /// Terminal events waiting for holds to be released
    deferred: HashMap<WorkflowId, (EventOrigin, EventKind)>,
    closed: HashSet<WorkflowId>,
    closed_order: VecDeque<WorkflowId>,
}

impl BusState {
    fn is_closed(&self, workflow_id: &WorkflowId) -> bool {
        self.closed.contains(workflow_id)
    }

    fn close(&mut self, workflow_id: &WorkflowId) {
        self.sequences.remove(workflow_id);
        self.parents.remove(workflow_id);
        self.holds.remove(workflow_id);
        if self.closed.insert(workflow_id.clone()) {
            self.closed_order.push_back(workflow_id.clone());
        }
        while self.closed_order.len() > CLOSED_RETAINED {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    /// Assign the next sequence number and fan the event out.
    fn deliver(&mut self, origin: &EventOrigin, kind: EventKind) -> StreamEvent {
        if let Some(parent) = &origin.parent_workflow_id {
            self.parents.insert(origin.workflow_id.clone(), parent.clone());
        }
        let sequence = {
            let counter = self.sequences.entry(origin.workflow_id.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let event = StreamEvent {
            workflow_id: origin.workflow_id.clone(),
            sequence,
            timestamp: Utc::now(),
            kind,
            sub_agent_id: origin.sub_agent_id.clone(),
            parent_workflow_id: origin.parent_workflow_id.clone(),
        };

        let terminal = event.kind.is_terminal();
        let parents = &self.parents;
        self.subscriptions.retain(|sub| {
            if !sub.wants(&event, parents) {
                return !sub.tx.is_closed();
            }
            if sub.tx.send(event.clone()).is_err() {
                return false;
            }
            // The workflow's own observers are released after its terminal event.
            !(terminal && sub.workflow.as_ref() == Some(&event.workflow_id))
        });
        if terminal {
            self.close(&event.workflow_id);
        }

        tracing::trace!(
            workflow_id = %event.workflow_id,
            sequence,
            chunk_type = event.kind.chunk_type(),
            "Event published"
        );
        event
    }
}

/// Keeps a workflow's stream open past its own end.
///
/// While any hold is alive, the workflow's `workflow_complete` is deferred
/// and other events for it are still delivered. Dropping the last hold
/// publishes the deferred terminal event.
pub struct StreamHold {
    bus: Arc<EventBus>,
    workflow_id: WorkflowId,
}

impl StreamHold {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }
}

impl Drop for StreamHold {
    fn drop(&mut self) {
        self.bus.release(&self.workflow_id);
    }
}

/// Ordered fan-out of workflow events to any number of observers.
///
/// Observers attached to a workflow also receive the events of every
/// workflow nested below it (those carry `parent_workflow_id`). Once a
/// workflow's `workflow_complete` is delivered its stream is closed and
/// later events for it are dropped.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Observe one workflow's stream (and everything nested below it).
    pub fn attach(&self, workflow_id: &WorkflowId) -> Observer {
        self.subscribe(Some(workflow_id.clone()))
    }

    /// Observe every workflow.
    pub fn attach_all(&self) -> Observer {
        self.subscribe(None)
    }

    fn subscribe(&self, workflow: Option<WorkflowId>) -> Observer {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_observer += 1;
        let id = ObserverId(state.next_observer);
        state.subscriptions.push(Subscription { id, workflow, tx });
        Observer { id, rx }
    }

    /// Stop delivering to an observer. Detaching twice is a no-op.
    pub fn detach(&self, id: ObserverId) {
        self.lock().subscriptions.retain(|s| s.id != id);
    }

    pub fn observer_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn is_closed(&self, workflow_id: &WorkflowId) -> bool {
        self.lock().is_closed(workflow_id)
    }

    /// Keep `workflow_id`'s stream open until the returned hold is dropped.
    pub fn hold(self: &Arc<Self>, workflow_id: &WorkflowId) -> StreamHold {
        *self.lock().holds.entry(workflow_id.clone()).or_insert(0) += 1;
        StreamHold {
            bus: Arc::clone(self),
            workflow_id: workflow_id.clone(),
        }
    }

    fn release(&self, workflow_id: &WorkflowId) {
        let mut state = self.lock();
        let remaining = match state.holds.get_mut(workflow_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        state.holds.remove(workflow_id);
        if let Some((origin, kind)) = state.deferred.remove(workflow_id) {
            state.deliver(&origin, kind);
        }
    }

    /// Publish an event for a top-level workflow.
    pub fn publish(&self, workflow_id: &WorkflowId, kind: EventKind) -> Option<StreamEvent> {
        self.publish_from(&EventOrigin::workflow(workflow_id.clone()), kind)
    }

    /// Publish an event with explicit nesting tags.
    ///
    /// The sequence number is assigned and the event delivered under one
    /// lock, so every observer sees a workflow's events in publish order.
    /// Returns `None` when the event was not delivered: its workflow is
    /// already closed, or it is a terminal event deferred by a hold.
    pub fn publish_from(&self, origin: &EventOrigin, kind: EventKind) -> Option<StreamEvent> {
        let mut state = self.lock();
        let workflow_id = &origin.workflow_id;

        if state.is_closed(workflow_id) || (state.deferred.contains_key(workflow_id) && kind.is_terminal()) {
            tracing::warn!(
                workflow_id = %workflow_id,
                chunk_type = kind.chunk_type(),
                "Dropping event for a closed workflow stream"
            );
            return None;
        }
        if kind.is_terminal() && state.holds.get(workflow_id).is_some_and(|n| *n > 0) {
            tracing::debug!(workflow_id = %workflow_id, "Deferring workflow_complete until held streams finish");
            state.deferred.insert(workflow_id.clone(), (origin.clone(), kind));
            return None;
        }

        Some(state.deliver(origin, kind))
    }
}
