//! The workflow orchestrator: one reasoning loop per workflow.
//!
//! Each iteration streams a model response, extracts `<tool_call>` blocks,
//! runs every call through the validation gate and then the dispatcher (or
//! the sub-agent coordinator), and feeds the observations back. A reply with
//! no calls is the final answer. Sub-agents are the same loop, run nested.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use cadence_config::{AgentConfig, AppConfig};
use cadence_core::cancel::{CancellationHandle, CancellationToken};
use cadence_core::error::{Error, ProviderError, Result, ToolError};
use cadence_core::event::{EventBus, EventKind, EventOrigin, Observer};
use cadence_core::external::ExternalToolServer;
use cadence_core::memory::ScopeFilter;
use cadence_core::message::{Message, MessageMetrics};
use cadence_core::provider::{Provider, ProviderRequest, Usage};
use cadence_core::store::{InMemoryWorkflowStore, WorkflowStore};
use cadence_core::tool::{ToolCall, ToolContext, ToolDefinition, ToolExecution};
use cadence_core::workflow::{SubAgentMetrics, Workflow, WorkflowId, WorkflowStatus};
use cadence_memory::{InMemoryBackend, MemorySettings, MemoryStore, ScoredMemory, SearchQuery};
use cadence_tools::{SubAgentControl, ToolDispatcher, ToolTarget, execution_record};
use cadence_validation::{AuditLogger, GateOutcome, ValidationGate};
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::parser::{ParsedCall, parse_response};
use crate::prompt::build_system_prompt;
use crate::subagent::{CallerContext, SubAgentCoordinator};

/// Final state of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub workflow: Workflow,
    pub tool_calls: u32,
    pub usage: Usage,
    pub duration_ms: u64,
}

impl WorkflowOutcome {
    pub fn id(&self) -> &WorkflowId {
        &self.workflow.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.workflow.status
    }

    pub fn answer(&self) -> Option<&str> {
        self.workflow.final_answer.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.workflow.error.as_deref()
    }

    pub fn iterations(&self) -> u32 {
        self.workflow.iteration
    }

    /// Figures reported to a parent when this run was a sub-agent.
    pub fn metrics(&self) -> SubAgentMetrics {
        SubAgentMetrics {
            iterations: self.workflow.iteration,
            tool_calls: self.tool_calls,
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
            duration_ms: self.duration_ms,
        }
    }
}

/// A workflow running in the background.
///
/// `events` was attached before the run started, so it sees every event of
/// the workflow and of its sub-agents.
pub struct WorkflowHandle {
    pub workflow_id: WorkflowId,
    pub events: Observer,
    pub task: JoinHandle<WorkflowOutcome>,
    cancel: CancellationHandle,
}

impl WorkflowHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<WorkflowOutcome> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("workflow task failed: {e}")))
    }
}

/// Everything one run of the loop needs besides the shared collaborators.
pub(crate) struct RunSpec {
    pub workflow: Workflow,
    pub system_prompt: String,
    /// Restricts the catalog and the callable tools
    pub allowed_tools: Option<Vec<String>>,
    pub max_iterations: u32,
    pub cancel: CancellationHandle,
    pub origin: EventOrigin,
    /// Set for sub-agents: where progress is reported
    pub report: Option<ProgressReport>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProgressReport {
    pub agent_id: String,
    pub parent_origin: EventOrigin,
}

enum Exit {
    Completed(String),
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct Tally {
    tool_calls: u32,
    usage: Usage,
}

impl Tally {
    fn add_usage(&mut self, usage: Option<&Usage>) {
        if let Some(u) = usage {
            self.usage.prompt_tokens += u.prompt_tokens;
            self.usage.completion_tokens += u.completion_tokens;
            self.usage.total_tokens += u.total_tokens;
        }
    }
}

struct ModelReply {
    message: Message,
    usage: Option<Usage>,
}

struct Inner {
    provider: Arc<dyn Provider>,
    dispatcher: Arc<ToolDispatcher>,
    gate: Arc<ValidationGate>,
    events: Arc<EventBus>,
    store: Arc<dyn WorkflowStore>,
    memory: MemoryStore,
    agent: AgentConfig,
    sub_agents: SubAgentCoordinator,
    running: Mutex<HashMap<WorkflowId, CancellationHandle>>,
}

/// Drives workflows. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

/// Builder for [`WorkflowOrchestrator`].
pub struct OrchestratorBuilder {
    provider: Arc<dyn Provider>,
    config: AppConfig,
    memory: Option<MemoryStore>,
    store: Option<Arc<dyn WorkflowStore>>,
    events: Option<Arc<EventBus>>,
    external: Option<Arc<dyn ExternalToolServer>>,
    audit: Option<Arc<AuditLogger>>,
}

impl OrchestratorBuilder {
    pub fn new(provider: Arc<dyn Provider>, config: AppConfig) -> Self {
        Self {
            provider,
            config,
            memory: None,
            store: None,
            events: None,
            external: None,
            audit: None,
        }
    }

    /// Use this memory store instead of a fresh in-memory one.
    pub fn with_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_external_server(mut self, server: Arc<dyn ExternalToolServer>) -> Self {
        self.external = Some(server);
        self
    }

    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> WorkflowOrchestrator {
        let config = self.config;
        let events = self.events.unwrap_or_else(|| Arc::new(EventBus::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryWorkflowStore::new()));
        let memory = self.memory.unwrap_or_else(|| {
            MemoryStore::new(Arc::new(InMemoryBackend::new()))
                .with_settings(MemorySettings::from_config(&config.memory))
        });

        let mut dispatcher = ToolDispatcher::new(memory.clone(), events.clone())
            .with_tools_config(&config.tools)
            .with_risk_overrides(config.validation.risk_overrides.clone());
        if let Some(server) = self.external {
            dispatcher = dispatcher.with_external_server(server);
        }

        let mut gate = ValidationGate::new(&config.validation, events.clone(), store.clone());
        if let Some(audit) = self.audit {
            gate = gate.with_audit(audit);
        }

        info!(
            model = %config.agent.model,
            validation_mode = ?config.validation.mode,
            max_iterations = config.agent.max_iterations,
            max_depth = config.sub_agents.max_depth,
            "Orchestrator ready"
        );

        WorkflowOrchestrator {
            inner: Arc::new(Inner {
                provider: self.provider,
                dispatcher: Arc::new(dispatcher),
                gate: Arc::new(gate),
                events,
                store,
                memory,
                agent: config.agent,
                sub_agents: SubAgentCoordinator::new(config.sub_agents),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl WorkflowOrchestrator {
    pub fn builder(provider: Arc<dyn Provider>, config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(provider, config)
    }

    /// An orchestrator with in-memory collaborators and default config.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self::builder(provider, AppConfig::default()).build()
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.inner.gate
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.inner.store
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.inner.dispatcher
    }

    pub fn sub_agents(&self) -> &SubAgentCoordinator {
        &self.inner.sub_agents
    }

    /// Run a new workflow to completion.
    pub async fn run(&self, agent_id: &str, message: impl Into<String>) -> WorkflowOutcome {
        let spec = self.root_spec(Workflow::new(agent_id));
        self.run_spec(spec, message.into()).await
    }

    /// Start a new workflow in the background.
    pub fn start(&self, agent_id: &str, message: impl Into<String>) -> WorkflowHandle {
        let spec = self.root_spec(Workflow::new(agent_id));
        let workflow_id = spec.workflow.id.clone();
        let cancel = spec.cancel.clone();
        let events = self.inner.events.attach(&workflow_id);
        // registered here so `cancel` works before the task is first polled
        self.register(&workflow_id, cancel.clone());
        let task = tokio::spawn(self.run_spec(spec, message.into()));
        WorkflowHandle {
            workflow_id,
            events,
            task,
            cancel,
        }
    }

    /// Cancel a running workflow. Sub-agents it started are cancelled with it.
    pub fn cancel(&self, workflow_id: &WorkflowId) -> bool {
        match self.running().get(workflow_id) {
            Some(handle) => {
                info!(workflow_id = %workflow_id, "Cancelling workflow");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, workflow_id: &WorkflowId) -> bool {
        self.running().contains_key(workflow_id)
    }

    /// Observe the events of a workflow and its sub-agents from now on.
    pub fn subscribe(&self, workflow_id: &WorkflowId) -> Observer {
        self.inner.events.attach(workflow_id)
    }

    fn root_spec(&self, workflow: Workflow) -> RunSpec {
        RunSpec {
            origin: EventOrigin::workflow(workflow.id.clone()),
            workflow,
            system_prompt: self.inner.agent.system_prompt.clone(),
            allowed_tools: None,
            max_iterations: self.inner.agent.max_iterations,
            cancel: CancellationHandle::new(),
            report: None,
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<WorkflowId, CancellationHandle>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, workflow_id: &WorkflowId, cancel: CancellationHandle) {
        self.running().insert(workflow_id.clone(), cancel);
    }

    /// Run one workflow, root or nested. Boxed so sub-agents can recurse.
    pub(crate) fn run_spec(&self, spec: RunSpec, message: String) -> BoxFuture<'static, WorkflowOutcome> {
        let this = self.clone();
        async move {
            let workflow_id = spec.workflow.id.clone();
            this.register(&workflow_id, spec.cancel.clone());
            let outcome = this.drive(spec, message).await;
            this.running().remove(&workflow_id);
            this.inner.sub_agents.evict_finished(&workflow_id);
            outcome
        }
        .boxed()
    }

    async fn drive(&self, spec: RunSpec, message: String) -> WorkflowOutcome {
        let started = Instant::now();
        let token = spec.cancel.token();
        let mut workflow = spec.workflow.clone();
        let mut tally = Tally::default();

        info!(
            workflow_id = %workflow.id,
            agent_id = %workflow.agent_id,
            depth = workflow.depth,
            parent = ?workflow.parent_id,
            "Workflow started"
        );

        workflow.push_message(Message::user(message));
        let exit = match workflow.start() {
            Ok(()) => {
                self.persist(&workflow).await;
                self.iterate(&spec, &mut workflow, &token, &mut tally).await
            }
            Err(e) => Exit::Failed(e.to_string()),
        };

        let transition = match exit {
            Exit::Completed(answer) => workflow.complete(answer),
            Exit::Failed(reason) => workflow.fail(reason),
            Exit::Cancelled => workflow.cancel(),
        };
        if let Err(e) = transition {
            warn!(workflow_id = %workflow.id, error = %e, "Could not record terminal status");
        }
        self.persist(&workflow).await;

        self.inner.events.publish_from(
            &spec.origin,
            EventKind::WorkflowComplete {
                status: workflow.status,
                error: workflow.error.clone(),
            },
        );

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            workflow_id = %workflow.id,
            status = %workflow.status.as_str(),
            iterations = workflow.iteration,
            tool_calls = tally.tool_calls,
            duration_ms,
            "Workflow finished"
        );

        WorkflowOutcome {
            workflow,
            tool_calls: tally.tool_calls,
            usage: tally.usage,
            duration_ms,
        }
    }

    async fn iterate(
        &self,
        spec: &RunSpec,
        workflow: &mut Workflow,
        token: &CancellationToken,
        tally: &mut Tally,
    ) -> Exit {
        let tools = self.catalog(spec, workflow.depth).await;

        loop {
            if token.is_cancelled() {
                return Exit::Cancelled;
            }
            if workflow.iteration >= spec.max_iterations {
                warn!(
                    workflow_id = %workflow.id,
                    max_iterations = spec.max_iterations,
                    "Iteration cap reached"
                );
                return Exit::Failed(format!(
                    "max iterations ({}) reached without a final answer",
                    spec.max_iterations
                ));
            }

            workflow.iteration += 1;
            let iteration = workflow.iteration;
            debug!(workflow_id = %workflow.id, iteration, "Iteration started");

            // memories stored by the previous iteration's calls are visible here
            let recalled = self.recall(workflow).await;
            let system_prompt = build_system_prompt(&spec.system_prompt, &tools, &recalled);

            let request = ProviderRequest {
                model: self.inner.agent.model.clone(),
                messages: std::iter::once(Message::system(system_prompt.as_str()))
                    .chain(workflow.messages.iter().cloned())
                    .collect(),
                temperature: self.inner.agent.temperature,
                max_tokens: Some(self.inner.agent.max_tokens),
                stop: vec![],
            };

            let reply = tokio::select! {
                reply = self.call_model(&spec.origin, request) => reply,
                _ = token.cancelled() => return Exit::Cancelled,
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!(workflow_id = %workflow.id, iteration, error = %e, "Model call failed");
                    return Exit::Failed(format!("model call failed: {e}"));
                }
            };
            tally.add_usage(reply.usage.as_ref());

            let parsed = parse_response(&reply.message.content);
            for thought in &parsed.reasoning {
                self.inner.events.publish_from(
                    &spec.origin,
                    EventKind::Reasoning {
                        content: thought.clone(),
                    },
                );
            }
            workflow.push_message(reply.message);

            if parsed.is_final() {
                self.report_progress(spec, iteration);
                return Exit::Completed(parsed.answer);
            }

            debug!(
                workflow_id = %workflow.id,
                iteration,
                calls = parsed.calls.len(),
                "Executing tool calls"
            );

            for call in parsed.calls {
                if token.is_cancelled() {
                    return Exit::Cancelled;
                }
                match call {
                    ParsedCall::Valid(call) => {
                        let execution = self.execute_call(spec, workflow, &call, token).await;
                        if token.is_cancelled() {
                            return Exit::Cancelled;
                        }
                        tally.tool_calls += 1;
                        if let Err(e) = self.inner.store.record_tool_execution(&execution).await {
                            warn!(workflow_id = %workflow.id, error = %e, "Failed to record tool execution");
                        }
                        workflow.push_message(Message::observation(
                            &execution.tool,
                            execution.success,
                            &execution.observation_text(),
                        ));
                    }
                    ParsedCall::Malformed { raw, error } => {
                        warn!(workflow_id = %workflow.id, iteration, %error, "Malformed tool call");
                        let body = format!(
                            "Malformed tool call ({error}): {raw}\nExpected <tool_call>{{\"name\": \"<tool>\", \"arguments\": {{...}}}}</tool_call>"
                        );
                        workflow.push_message(Message::observation("tool_call", false, &body));
                    }
                }
            }

            self.persist(workflow).await;
            self.report_progress(spec, iteration);
        }
    }

    /// Stream one model response, publishing each delta as a token event.
    async fn call_model(
        &self,
        origin: &EventOrigin,
        request: ProviderRequest,
    ) -> std::result::Result<ModelReply, ProviderError> {
        let started = Instant::now();
        let mut rx = self.inner.provider.stream(request).await?;
        let mut content = String::new();
        let mut usage = None;

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                content.push_str(&delta);
                self.inner
                    .events
                    .publish_from(origin, EventKind::Token { content: delta });
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        let metrics = MessageMetrics {
            prompt_tokens: usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().map(|u| u.completion_tokens),
            cost_usd: None,
            duration_ms: Some(started.elapsed().as_millis() as u64),
        };
        Ok(ModelReply {
            message: Message::assistant(content).with_metrics(metrics),
            usage,
        })
    }

    async fn execute_call(
        &self,
        spec: &RunSpec,
        workflow: &Workflow,
        call: &ToolCall,
        token: &CancellationToken,
    ) -> ToolExecution {
        let ctx = ToolContext {
            workflow_id: workflow.id.clone(),
            iteration: workflow.iteration,
            sub_agent_id: spec.origin.sub_agent_id.clone(),
            parent_workflow_id: spec.origin.parent_workflow_id.clone(),
        };
        self.inner.events.publish_from(
            &spec.origin,
            EventKind::ToolStart {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                input: call.arguments.clone(),
            },
        );

        let started = Instant::now();
        let execution = match self.authorize(spec, &ctx, call, token).await {
            Err(e) => execution_record(&ctx, call, call.name.clone(), started, Err(e)),
            Ok(ToolTarget::SubAgent(control)) => {
                let caller = CallerContext {
                    workflow_id: workflow.id.clone(),
                    origin: spec.origin.clone(),
                    depth: workflow.depth,
                    max_iterations: spec.max_iterations,
                    cancel: spec.cancel.clone(),
                };
                let outcome = self
                    .inner
                    .sub_agents
                    .handle(self, &caller, control, call.arguments.clone())
                    .await;
                execution_record(&ctx, call, control.name().to_string(), started, outcome)
            }
            Ok(_) => tokio::select! {
                execution = self.inner.dispatcher.dispatch(&ctx, call) => execution,
                _ = token.cancelled() => execution_record(
                    &ctx,
                    call,
                    call.name.clone(),
                    started,
                    Err(ToolError::ExecutionFailed {
                        tool_name: call.name.clone(),
                        reason: "cancelled".into(),
                    }),
                ),
            },
        };

        self.inner.events.publish_from(
            &spec.origin,
            EventKind::ToolEnd {
                call_id: call.id.clone(),
                tool: execution.tool.clone(),
                success: execution.success,
                output: execution.observation_text(),
                duration_ms: execution.duration_ms,
            },
        );
        execution
    }

    /// Resolve the call and pass it through the validation gate.
    async fn authorize(
        &self,
        spec: &RunSpec,
        ctx: &ToolContext,
        call: &ToolCall,
        token: &CancellationToken,
    ) -> std::result::Result<ToolTarget, ToolError> {
        let dispatcher = &self.inner.dispatcher;
        let target = dispatcher.resolve(&call.name)?;
        let name = target.name();

        if let Some(allowed) = &spec.allowed_tools {
            if !allowed.iter().any(|a| a == &name) {
                return Err(ToolError::NotFound(format!("{name} (not available to this agent)")));
            }
        }

        let (operation_type, risk) = dispatcher.classify(&target, &call.arguments);
        let details = json!({
            "tool": name,
            "arguments": call.arguments,
            "iteration": ctx.iteration,
        });
        let outcome = self
            .inner
            .gate
            .check(&spec.origin, operation_type, &name, risk, details, token)
            .await;

        match outcome {
            GateOutcome::Rejected(request) => Err(ToolError::Rejected {
                tool_name: name,
                reason: request.reason.unwrap_or_else(|| "rejected".into()),
            }),
            GateOutcome::Proceed | GateOutcome::Approved(_) => Ok(target),
        }
    }

    async fn recall(&self, workflow: &Workflow) -> Vec<ScoredMemory> {
        let limit = self.inner.agent.recall_limit;
        if limit == 0 {
            return vec![];
        }
        let Some(query) = workflow.last_user_message().map(|m| m.content.clone()) else {
            return vec![];
        };

        let search = SearchQuery {
            limit: Some(limit),
            ..SearchQuery::new(query, ScopeFilter::Both)
        };
        match self.inner.memory.search(Some(&workflow.id), &search).await {
            Ok(hits) => {
                debug!(workflow_id = %workflow.id, recalled = hits.len(), "Memories recalled");
                hits
            }
            Err(e) => {
                warn!(workflow_id = %workflow.id, error = %e, "Memory recall failed");
                vec![]
            }
        }
    }

    /// Tool definitions offered to this run.
    async fn catalog(&self, spec: &RunSpec, depth: u32) -> Vec<ToolDefinition> {
        let mut tools = self.inner.dispatcher.definitions().await;
        if depth >= self.inner.sub_agents.max_depth() {
            tools.retain(|t| SubAgentControl::from_name(&t.name).is_none());
        }
        if let Some(allowed) = &spec.allowed_tools {
            tools.retain(|t| allowed.contains(&t.name));
        }
        tools
    }

    fn report_progress(&self, spec: &RunSpec, iteration: u32) {
        if let Some(report) = &spec.report {
            self.inner
                .sub_agents
                .progress(&self.inner.events, report, iteration, spec.max_iterations);
        }
    }

    async fn persist(&self, workflow: &Workflow) {
        if let Err(e) = self.inner.store.save_workflow(workflow).await {
            warn!(workflow_id = %workflow.id, error = %e, "Failed to persist workflow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, tool_call};
    use cadence_core::event::StreamEvent;
    use cadence_core::message::Role;
    use cadence_core::validation::ValidationMode;

    fn orchestrator(provider: SequentialMockProvider) -> (WorkflowOrchestrator, Arc<SequentialMockProvider>) {
        let provider = Arc::new(provider);
        (WorkflowOrchestrator::new(provider.clone()), provider)
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind.chunk_type()).collect()
    }

    #[tokio::test]
    async fn text_reply_completes_in_one_iteration() {
        let (orch, provider) = orchestrator(SequentialMockProvider::texts(&["Hello there!"]));
        let outcome = orch.run("assistant", "hi").await;

        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        assert_eq!(outcome.answer(), Some("Hello there!"));
        assert_eq!(outcome.iterations(), 1);
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(provider.call_count(), 1);

        let saved = orch.store().get_workflow(outcome.id()).await.unwrap().unwrap();
        assert_eq!(saved.status, WorkflowStatus::Completed);
        assert_eq!(saved.messages.len(), 2);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let (orch, provider) = orchestrator(SequentialMockProvider::texts(&[
            &tool_call("calculator", json!({"expression": "6 * 7"})),
            "The answer is 42.",
        ]));
        let outcome = orch.run("assistant", "what is 6 times 7?").await;

        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        assert_eq!(outcome.answer(), Some("The answer is 42."));
        assert_eq!(outcome.iterations(), 2);
        assert_eq!(outcome.tool_calls, 1);

        let observation = &outcome.workflow.messages[2];
        assert_eq!(observation.role, Role::User);
        assert!(observation.is_observation());
        assert!(observation.content.contains("42"));

        let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert!(executions[0].success);

        // the second request carries the observation
        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.is_observation()));
    }

    #[tokio::test]
    async fn system_prompt_lists_tools() {
        let (orch, provider) = orchestrator(SequentialMockProvider::texts(&["ok"]));
        orch.run("assistant", "hi").await;

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        let system = &request.messages[0].content;
        for name in ["calculator", "memory", "todo", "spawn_agent"] {
            assert!(system.contains(name), "{name}");
        }
    }

    #[tokio::test]
    async fn memories_added_mid_run_are_recalled_next_iteration() {
        let preference = "I prefer metric units for distances";
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call(
                "memory",
                json!({"operation": "add", "type": "user_pref", "content": preference}),
            ),
            "Noted.",
        ]));
        let orch = WorkflowOrchestrator::builder(provider.clone(), crate::test_helpers::auto_config()).build();
        let outcome = orch.run("assistant", preference).await;
        assert_eq!(outcome.status(), WorkflowStatus::Completed);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].messages[0].content.contains(preference));
        assert!(requests[1].messages[0].content.contains(preference));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_observation() {
        let (orch, _) = orchestrator(SequentialMockProvider::texts(&[
            &tool_call("teleport", json!({})),
            "Sorry, I can't do that.",
        ]));
        let outcome = orch.run("assistant", "beam me up").await;

        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        let observation = &outcome.workflow.messages[2];
        assert!(observation.content.contains("Tool not found"));
        let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
        assert!(!executions[0].success);
    }

    #[tokio::test]
    async fn malformed_call_is_reported_back() {
        let (orch, _) = orchestrator(SequentialMockProvider::texts(&[
            "<tool_call>{oops}</tool_call>",
            "Fine.",
        ]));
        let outcome = orch.run("assistant", "go").await;

        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        assert!(outcome.workflow.messages[2].content.contains("Malformed tool call"));
        assert_eq!(outcome.tool_calls, 0);
    }

    #[tokio::test]
    async fn iteration_cap_fails_the_workflow() {
        let looping = tool_call("calculator", json!({"expression": "1 + 1"}));
        let provider = Arc::new(SequentialMockProvider::texts(&[&looping, &looping, &looping, &looping]));
        let mut config = AppConfig::default();
        config.agent.max_iterations = 3;
        let orch = WorkflowOrchestrator::builder(provider.clone(), config).build();

        let outcome = orch.run("assistant", "loop").await;
        assert_eq!(outcome.status(), WorkflowStatus::Error);
        assert!(outcome.error().unwrap().contains("max iterations (3)"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn provider_error_fails_the_workflow() {
        let (orch, _) = orchestrator(SequentialMockProvider::new(vec![]));
        let outcome = orch.run("assistant", "hi").await;
        assert_eq!(outcome.status(), WorkflowStatus::Error);
        assert!(outcome.error().unwrap().starts_with("model call failed"));
    }

    #[tokio::test]
    async fn tokens_stream_before_completion() {
        let (orch, _) = orchestrator(SequentialMockProvider::texts(&[
            "<thinking>short is fine</thinking>All done here.",
        ]));
        let mut handle = orch.start("assistant", "hi");
        let outcome = handle.task.await.unwrap();
        let events = handle.events.drain();

        let tokens: String = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Token { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, outcome.workflow.messages[1].content);
        assert!(kinds(&events).contains(&"reasoning"));
        assert_eq!(kinds(&events).last(), Some(&"workflow_complete"));
        assert_eq!(outcome.answer(), Some("All done here."));
    }

    #[tokio::test]
    async fn assistant_messages_carry_metrics() {
        let (orch, _) = orchestrator(SequentialMockProvider::texts(&["done"]));
        let outcome = orch.run("assistant", "hi").await;
        let metrics = outcome.workflow.messages[1].metrics.clone().unwrap();
        assert_eq!(metrics.prompt_tokens, Some(10));
        assert_eq!(metrics.completion_tokens, Some(5));
        assert_eq!(outcome.usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn manual_mode_rejection_is_observed() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("memory", json!({"operation": "clear_by_type", "type": "fact"})),
            "Okay, I left them alone.",
        ]));
        let mut config = AppConfig::default();
        config.validation.mode = ValidationMode::Manual;
        let orch = WorkflowOrchestrator::builder(provider, config).build();

        let mut handle = orch.start("assistant", "forget all facts");
        let request = loop {
            match handle.events.recv().await.unwrap().kind {
                EventKind::ValidationRequired { request } => break request,
                _ => continue,
            }
        };
        orch.gate().reject(&request.id, "keep them").await.unwrap();

        let outcome = handle.task.await.unwrap();
        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        let observation = &outcome.workflow.messages[2];
        assert!(observation.content.contains("rejected"));
        assert!(observation.content.contains("keep them"));
    }

    #[tokio::test]
    async fn cancel_unknown_workflow_is_false() {
        let (orch, _) = orchestrator(SequentialMockProvider::texts(&[]));
        assert!(!orch.cancel(&WorkflowId::new()));
    }
}
