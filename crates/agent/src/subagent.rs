//! Sub-agent coordination: spawn, delegate, parallel groups and status.
//!
//! A sub-agent is a nested workflow run by the same orchestrator loop with
//! its own history, a depth one greater than its parent, an iteration cap no
//! larger than the parent's, and a cancellation signal derived from the
//! parent's. Its events carry the parent's workflow id so observers of the
//! parent see them.
//!
//! The registry only holds sub-agents whose parent is still running, plus
//! spawned ones still at work; finished records live in the
//! [`WorkflowStore`](cadence_core::store::WorkflowStore).

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cadence_config::SubAgentConfig;
use cadence_core::cancel::CancellationHandle;
use cadence_core::error::ToolError;
use cadence_core::event::{EventBus, EventKind, EventOrigin};
use cadence_core::tool::ToolResult;
use cadence_core::workflow::{ActiveSubAgent, SubAgentMode, SubAgentStatus, Workflow, WorkflowId, WorkflowStatus};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use cadence_tools::SubAgentControl;

use crate::orchestrator::{ProgressReport, RunSpec, WorkflowOrchestrator};
use crate::prompt::SUB_AGENT_PROMPT;

/// One task handed to a sub-agent.
#[derive(Debug, Clone, Deserialize)]
pub struct SubTaskSpec {
    pub task: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Restricts the sub-agent to these tools
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ParallelArgs {
    tasks: Vec<SubTaskSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusArgs {
    #[serde(default)]
    sub_agent_id: Option<String>,
}

/// The calling workflow, as seen by the coordinator.
pub(crate) struct CallerContext {
    pub workflow_id: WorkflowId,
    pub origin: EventOrigin,
    pub depth: u32,
    pub max_iterations: u32,
    pub cancel: CancellationHandle,
}

/// A registered sub-agent ready to run.
pub(crate) struct PreparedRun {
    spec: RunSpec,
    task: String,
    parent_origin: EventOrigin,
}

/// Tracks the sub-agents of running workflows.
pub struct SubAgentCoordinator {
    config: SubAgentConfig,
    registry: RwLock<HashMap<String, ActiveSubAgent>>,
}

impl SubAgentCoordinator {
    pub fn new(config: SubAgentConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SubAgentConfig {
        &self.config
    }

    pub fn max_depth(&self) -> u32 {
        self.config.max_depth
    }

    /// A sub-agent still tracked in memory.
    pub fn get(&self, id: &str) -> Option<ActiveSubAgent> {
        self.read().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.read().len()
    }

    /// Drop the finished sub-agents of a workflow that has ended.
    pub(crate) fn evict_finished(&self, parent: &WorkflowId) {
        let mut registry = self.write();
        let before = registry.len();
        registry.retain(|_, a| !(&a.parent_workflow_id == parent && a.status.is_finished()));
        let evicted = before - registry.len();
        if evicted > 0 {
            debug!(workflow_id = %parent, evicted, "Sub-agents released");
        }
    }

    fn evict(&self, id: &str) {
        self.write().remove(id);
    }

    /// Sub-agents started by one workflow, oldest first.
    pub fn for_parent(&self, parent: &WorkflowId) -> Vec<ActiveSubAgent> {
        let mut agents: Vec<_> = self
            .read()
            .values()
            .filter(|a| &a.parent_workflow_id == parent)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.started_at);
        agents
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ActiveSubAgent>> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ActiveSubAgent>> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute one sub-agent control call for `caller`.
    pub(crate) async fn handle(
        &self,
        orchestrator: &WorkflowOrchestrator,
        caller: &CallerContext,
        control: SubAgentControl,
        arguments: Value,
    ) -> Result<ToolResult, ToolError> {
        match control {
            SubAgentControl::Status => self.status(orchestrator, caller, arguments).await,
            SubAgentControl::Spawn => {
                self.check_depth(caller, control)?;
                let spec: SubTaskSpec = parse_args(arguments)?;
                let run = self.prepare(orchestrator, caller, spec, SubAgentMode::Spawn).await?;
                let agent_id = run.agent_id().to_string();
                let workflow_id = run.spec.workflow.id.clone();

                // the parent's stream stays open until this child reports back
                let hold = orchestrator.events().hold(&caller.workflow_id);
                let parent = caller.workflow_id.clone();
                let orch = orchestrator.clone();
                tokio::spawn(async move {
                    let coordinator = orch.sub_agents();
                    let agent = coordinator.execute(&orch, run).await;
                    if !orch.is_running(&parent) {
                        coordinator.evict(&agent.id);
                    }
                    drop(hold);
                });

                Ok(ToolResult::json(json!({
                    "sub_agent_id": agent_id,
                    "workflow_id": workflow_id,
                    "status": "running",
                })))
            }
            SubAgentControl::Delegate => {
                self.check_depth(caller, control)?;
                let spec: SubTaskSpec = parse_args(arguments)?;
                let run = self.prepare(orchestrator, caller, spec, SubAgentMode::Delegate).await?;
                let agent = self.execute(orchestrator, run).await;
                Ok(delegation_result(&agent))
            }
            SubAgentControl::Parallel => {
                self.check_depth(caller, control)?;
                self.parallel(orchestrator, caller, arguments).await
            }
        }
    }

    fn check_depth(&self, caller: &CallerContext, control: SubAgentControl) -> Result<(), ToolError> {
        if caller.depth < self.config.max_depth {
            return Ok(());
        }
        warn!(
            workflow_id = %caller.workflow_id,
            depth = caller.depth,
            max_depth = self.config.max_depth,
            "Sub-agent depth limit reached"
        );
        Err(ToolError::Rejected {
            tool_name: control.name().into(),
            reason: format!("sub-agent depth limit ({}) reached", self.config.max_depth),
        })
    }

    async fn parallel(
        &self,
        orchestrator: &WorkflowOrchestrator,
        caller: &CallerContext,
        arguments: Value,
    ) -> Result<ToolResult, ToolError> {
        let args: ParallelArgs = parse_args(arguments)?;
        if args.tasks.is_empty() {
            return Err(ToolError::InvalidArguments(
                "parallel_agents needs at least one task".into(),
            ));
        }
        if args.tasks.len() > self.config.max_parallel_tasks {
            return Err(ToolError::InvalidArguments(format!(
                "parallel_agents accepts at most {} tasks, got {}",
                self.config.max_parallel_tasks,
                args.tasks.len()
            )));
        }
        if args.tasks.iter().any(|t| t.task.trim().is_empty()) {
            return Err(ToolError::InvalidArguments("every task needs a non-empty 'task'".into()));
        }

        let mut runs = Vec::with_capacity(args.tasks.len());
        for spec in args.tasks {
            runs.push(self.prepare(orchestrator, caller, spec, SubAgentMode::Parallel).await?);
        }
        info!(
            workflow_id = %caller.workflow_id,
            members = runs.len(),
            max_parallel = self.config.max_parallel,
            "Parallel group started"
        );

        // `buffered` keeps input order regardless of completion order
        let finished: Vec<ActiveSubAgent> = stream::iter(runs)
            .map(|run| self.execute(orchestrator, run))
            .buffered(self.config.max_parallel.max(1))
            .collect()
            .await;

        let failed = finished
            .iter()
            .filter(|a| a.status != SubAgentStatus::Completed)
            .count();
        let results: Vec<Value> = finished
            .iter()
            .map(|a| {
                json!({
                    "sub_agent_id": a.id,
                    "task": a.task,
                    "success": a.status == SubAgentStatus::Completed,
                    "result": a.result,
                    "error": a.error,
                    "metrics": a.metrics,
                })
            })
            .collect();

        Ok(ToolResult::json(json!({
            "results": results,
            "succeeded": finished.len() - failed,
            "failed": failed,
        })))
    }

    async fn status(
        &self,
        orchestrator: &WorkflowOrchestrator,
        caller: &CallerContext,
        arguments: Value,
    ) -> Result<ToolResult, ToolError> {
        let args: StatusArgs = if arguments.is_null() {
            StatusArgs::default()
        } else {
            parse_args(arguments)?
        };

        match args.sub_agent_id {
            Some(id) => match self.lookup(orchestrator, &id).await {
                Some(agent) => Ok(ToolResult::json(json!(agent))),
                None => Ok(ToolResult::failure(format!("No sub-agent with id '{id}'"))),
            },
            None => {
                let agents = self.children(orchestrator, &caller.workflow_id).await;
                Ok(ToolResult::json(json!({
                    "count": agents.len(),
                    "sub_agents": agents,
                })))
            }
        }
    }

    /// Live record if tracked, otherwise the stored one.
    async fn lookup(&self, orchestrator: &WorkflowOrchestrator, id: &str) -> Option<ActiveSubAgent> {
        if let Some(agent) = self.get(id) {
            return Some(agent);
        }
        match orchestrator.store().get_sub_agent(id).await {
            Ok(agent) => agent,
            Err(e) => {
                warn!(sub_agent_id = id, error = %e, "Sub-agent lookup failed");
                None
            }
        }
    }

    /// Every sub-agent of `parent`: stored records with live progress laid over them.
    async fn children(&self, orchestrator: &WorkflowOrchestrator, parent: &WorkflowId) -> Vec<ActiveSubAgent> {
        let mut agents = match orchestrator.store().sub_agents(parent).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(workflow_id = %parent, error = %e, "Sub-agent listing failed");
                vec![]
            }
        };
        for live in self.for_parent(parent) {
            match agents.iter_mut().find(|a| a.id == live.id) {
                Some(slot) => *slot = live,
                None => agents.push(live),
            }
        }
        agents.sort_by_key(|a| a.started_at);
        agents
    }

    /// Register a sub-agent as running and announce it to the parent.
    async fn prepare(
        &self,
        orchestrator: &WorkflowOrchestrator,
        caller: &CallerContext,
        spec: SubTaskSpec,
        mode: SubAgentMode,
    ) -> Result<PreparedRun, ToolError> {
        let task = spec.task.trim().to_string();
        if task.is_empty() {
            return Err(ToolError::InvalidArguments("'task' must not be empty".into()));
        }

        let mut agent = ActiveSubAgent::new(caller.workflow_id.clone(), task.clone(), mode);
        agent.status = SubAgentStatus::Running;

        let workflow = Workflow::new(format!("sub-agent:{}", agent.id))
            .with_id(agent.workflow_id.clone())
            .with_parent(caller.workflow_id.clone(), caller.depth + 1);
        let system_prompt = spec
            .system_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| SUB_AGENT_PROMPT.to_string());

        let run = PreparedRun {
            spec: RunSpec {
                workflow,
                system_prompt,
                allowed_tools: spec.tools,
                max_iterations: self.config.max_iterations.min(caller.max_iterations),
                cancel: caller.cancel.child(),
                origin: EventOrigin::nested(
                    agent.workflow_id.clone(),
                    agent.id.clone(),
                    caller.workflow_id.clone(),
                ),
                report: Some(ProgressReport {
                    agent_id: agent.id.clone(),
                    parent_origin: caller.origin.clone(),
                }),
            },
            task: task.clone(),
            parent_origin: caller.origin.clone(),
        };

        self.write().insert(agent.id.clone(), agent.clone());
        if let Err(e) = orchestrator.store().save_sub_agent(&agent).await {
            warn!(sub_agent_id = %agent.id, error = %e, "Failed to persist sub-agent");
        }
        orchestrator.events().publish_from(
            &caller.origin,
            EventKind::SubAgentStart {
                agent: agent.id.clone(),
                task,
                mode,
                nested_workflow_id: agent.workflow_id.clone(),
            },
        );
        info!(
            sub_agent_id = %agent.id,
            parent = %caller.workflow_id,
            depth = caller.depth + 1,
            mode = ?mode,
            "Sub-agent started"
        );

        Ok(run)
    }

    /// Run a prepared sub-agent to its end and record the outcome.
    async fn execute(&self, orchestrator: &WorkflowOrchestrator, run: PreparedRun) -> ActiveSubAgent {
        let agent_id = run.agent_id().to_string();
        let parent_origin = run.parent_origin.clone();
        let outcome = orchestrator.run_spec(run.spec, run.task).await;

        let mut agent = match self.get(&agent_id) {
            Some(agent) => agent,
            None => {
                warn!(sub_agent_id = %agent_id, "Sub-agent vanished from registry");
                let mut agent = ActiveSubAgent::new(
                    parent_origin.workflow_id.clone(),
                    String::new(),
                    SubAgentMode::Delegate,
                );
                agent.id = agent_id.clone();
                agent.workflow_id = outcome.id().clone();
                agent
            }
        };
        agent.metrics = Some(outcome.metrics());
        agent.finished_at = Some(Utc::now());

        let kind = if outcome.status() == WorkflowStatus::Completed {
            agent.status = SubAgentStatus::Completed;
            agent.progress = 100;
            agent.result = outcome.answer().map(str::to_string);
            EventKind::SubAgentComplete {
                agent: agent.id.clone(),
                result: agent.result.clone().unwrap_or_default(),
                metrics: outcome.metrics(),
            }
        } else {
            let error = match outcome.status() {
                WorkflowStatus::Cancelled => "cancelled".to_string(),
                _ => outcome.error().unwrap_or("sub-agent failed").to_string(),
            };
            agent.status = SubAgentStatus::Error;
            agent.error = Some(error.clone());
            EventKind::SubAgentError {
                agent: agent.id.clone(),
                error,
            }
        };

        self.write().insert(agent.id.clone(), agent.clone());
        if let Err(e) = orchestrator.store().save_sub_agent(&agent).await {
            warn!(sub_agent_id = %agent.id, error = %e, "Failed to persist sub-agent");
        }
        orchestrator.events().publish_from(&parent_origin, kind);
        info!(
            sub_agent_id = %agent.id,
            status = ?agent.status,
            iterations = outcome.iterations(),
            duration_ms = outcome.duration_ms,
            "Sub-agent finished"
        );

        agent
    }

    /// Record and announce the progress of a running sub-agent.
    pub(crate) fn progress(&self, events: &EventBus, report: &ProgressReport, iteration: u32, cap: u32) {
        let progress = ((iteration as u64 * 100) / cap.max(1) as u64).min(99) as u8;
        if let Some(agent) = self.write().get_mut(&report.agent_id) {
            if agent.status.is_finished() {
                return;
            }
            agent.progress = progress;
        }
        debug!(sub_agent_id = %report.agent_id, iteration, progress, "Sub-agent progress");
        events.publish_from(
            &report.parent_origin,
            EventKind::SubAgentProgress {
                agent: report.agent_id.clone(),
                iteration,
                progress,
            },
        );
    }
}

impl PreparedRun {
    fn agent_id(&self) -> &str {
        self.spec
            .report
            .as_ref()
            .map(|r| r.agent_id.as_str())
            .unwrap_or_default()
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn delegation_result(agent: &ActiveSubAgent) -> ToolResult {
    match agent.status {
        SubAgentStatus::Completed => {
            let result = agent.result.clone().unwrap_or_default();
            ToolResult {
                success: true,
                output: result.clone(),
                data: Some(json!({
                    "sub_agent_id": agent.id,
                    "workflow_id": agent.workflow_id,
                    "result": result,
                    "metrics": agent.metrics,
                })),
            }
        }
        _ => ToolResult::failure(format!(
            "Sub-agent {} failed: {}",
            agent.id,
            agent.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, SequentialMockProvider, auto_config, tool_call};
    use cadence_core::event::StreamEvent;
    use std::sync::Arc;

    fn of_kind<'a>(events: &'a [StreamEvent], kind: &str) -> Vec<&'a StreamEvent> {
        events.iter().filter(|e| e.kind.chunk_type() == kind).collect()
    }

    #[tokio::test]
    async fn delegate_returns_the_nested_answer() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("delegate_agent", json!({"task": "summarize the notes"})),
            "Notes summarized.",
            "The summary is ready.",
        ]));
        let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();
        let mut handle = orch.start("assistant", "summarize my notes");
        let outcome = handle.task.await.unwrap();
        let events = handle.events.drain();

        assert_eq!(outcome.status(), WorkflowStatus::Completed);
        assert_eq!(outcome.answer(), Some("The summary is ready."));
        assert!(outcome.workflow.messages[2].content.contains("Notes summarized."));

        let started = of_kind(&events, "sub_agent_start");
        assert_eq!(started.len(), 1);
        assert_eq!(&started[0].workflow_id, outcome.id());
        assert_eq!(of_kind(&events, "sub_agent_complete").len(), 1);

        // nested events reach the parent's observer tagged with the parent
        let nested: Vec<_> = events
            .iter()
            .filter(|e| e.parent_workflow_id.as_ref() == Some(outcome.id()))
            .collect();
        assert!(!nested.is_empty());
        assert!(nested.iter().all(|e| e.sub_agent_id.is_some()));

        let agents = orch.store().sub_agents(outcome.id()).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].status, SubAgentStatus::Completed);
        assert_eq!(agents[0].progress, 100);
        assert_eq!(agents[0].metrics.as_ref().unwrap().iterations, 1);

        let nested_wf = orch.store().get_workflow(&agents[0].workflow_id).await.unwrap().unwrap();
        assert_eq!(nested_wf.depth, 1);
        assert_eq!(nested_wf.parent_id.as_ref(), Some(outcome.id()));
    }

    #[tokio::test]
    async fn depth_limit_rejects_nested_spawn() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("delegate_agent", json!({"task": "go deeper"})),
            &tool_call("delegate_agent", json!({"task": "and deeper"})),
            "Could not go deeper.",
            "Done.",
        ]));
        let mut config = auto_config();
        config.sub_agents.max_depth = 1;
        let orch = WorkflowOrchestrator::builder(provider, config).build();

        let outcome = orch.run("assistant", "recurse").await;
        assert_eq!(outcome.status(), WorkflowStatus::Completed);

        let agents = orch.store().sub_agents(outcome.id()).await.unwrap();
        assert_eq!(agents.len(), 1);
        let executions = orch.store().tool_executions(&agents[0].workflow_id).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert!(!executions[0].success);
        assert!(executions[0].error.as_ref().unwrap().contains("depth limit"));
    }

    #[tokio::test]
    async fn nested_catalog_drops_controls_at_max_depth() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("delegate_agent", json!({"task": "look around"})),
            "Nothing here.",
            "Done.",
        ]));
        let mut config = auto_config();
        config.sub_agents.max_depth = 1;
        let orch = WorkflowOrchestrator::builder(provider.clone(), config).build();
        orch.run("assistant", "explore").await;

        let requests = provider.requests();
        assert!(requests[0].messages[0].content.contains("spawn_agent"));
        assert!(!requests[1].messages[0].content.contains("spawn_agent"));
    }

    #[tokio::test]
    async fn spawn_returns_immediately() {
        let provider = Arc::new(ScriptedProvider::new(|request| {
            let task = ScriptedProvider::first_user_message(request);
            if task == "background work" {
                return Ok("Background finished.".into());
            }
            if ScriptedProvider::has_observation(request) {
                Ok("Spawned it.".into())
            } else {
                Ok(tool_call("spawn_agent", json!({"task": "background work"})))
            }
        }));
        let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();
        let outcome = orch.run("assistant", "start something").await;
        assert_eq!(outcome.answer(), Some("Spawned it."));

        let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
        let data = executions[0].output.clone().unwrap();
        assert_eq!(data["status"], "running");
        let agent_id = data["sub_agent_id"].as_str().unwrap().to_string();

        let mut finished = None;
        for _ in 0..100 {
            let stored = orch.store().get_sub_agent(&agent_id).await.unwrap();
            if let Some(agent) = stored.filter(|a| a.status.is_finished()) {
                finished = Some(agent);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let agent = finished.unwrap();
        assert_eq!(agent.status, SubAgentStatus::Completed);
        assert_eq!(agent.result.as_deref(), Some("Background finished."));
    }

    #[tokio::test]
    async fn parallel_rejects_empty_and_oversized_groups() {
        let too_many: Vec<_> = (0..3).map(|i| json!({"task": format!("t{i}")})).collect();
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("parallel_agents", json!({"tasks": []})),
            &tool_call("parallel_agents", json!({"tasks": too_many})),
            "Gave up.",
        ]));
        let mut config = auto_config();
        config.sub_agents.max_parallel_tasks = 2;
        let orch = WorkflowOrchestrator::builder(provider, config).build();

        let outcome = orch.run("assistant", "fan out").await;
        let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert!(executions.iter().all(|e| !e.success));
        assert!(executions[1].error.as_ref().unwrap().contains("at most 2"));
        assert!(orch.store().sub_agents(outcome.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn registry_is_released_when_the_parent_finishes() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("delegate_agent", json!({"task": "one"})),
            "first done",
            "All good.",
        ]));
        let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();
        let outcome = orch.run("assistant", "check").await;
        assert_eq!(outcome.status(), WorkflowStatus::Completed);

        assert_eq!(orch.sub_agents().active_count(), 0);
        assert!(orch.sub_agents().for_parent(outcome.id()).is_empty());

        // the finished record is still reachable through the store
        let stored = orch.store().sub_agents(outcome.id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SubAgentStatus::Completed);
    }

    #[tokio::test]
    async fn status_lists_children() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tool_call("delegate_agent", json!({"task": "one"})),
            "first done",
            &tool_call("sub_agent_status", json!({})),
            "All good.",
        ]));
        let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();
        let outcome = orch.run("assistant", "check").await;

        let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
        let status = executions[1].output.clone().unwrap();
        assert_eq!(status["count"], 1);
        assert_eq!(status["sub_agents"][0]["status"], "completed");
    }

    #[test]
    fn progress_is_capped_below_complete() {
        let coordinator = SubAgentCoordinator::new(SubAgentConfig::default());
        let events = EventBus::new();
        let parent = WorkflowId::new();
        let mut observer = events.attach(&parent);
        let report = ProgressReport {
            agent_id: "a1".into(),
            parent_origin: EventOrigin::workflow(parent),
        };
        coordinator.progress(&events, &report, 10, 10);
        match observer.try_recv().unwrap().kind {
            EventKind::SubAgentProgress { progress, .. } => assert_eq!(progress, 99),
            other => panic!("unexpected {other:?}"),
        }
    }
}
