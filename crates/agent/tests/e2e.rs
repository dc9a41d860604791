//! End-to-end orchestration scenarios over scripted providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cadence_agent::WorkflowOrchestrator;
use cadence_agent::test_helpers::{EchoToolServer, ScriptedProvider, SequentialMockProvider, auto_config, tool_call};
use cadence_config::AppConfig;
use cadence_core::error::ProviderError;
use cadence_core::event::{EventKind, Observer, StreamEvent};
use cadence_core::memory::{MemoryType, ScopeFilter};
use cadence_core::validation::{ValidationMode, ValidationRequest, ValidationStatus};
use cadence_core::workflow::{SubAgentStatus, WorkflowId, WorkflowStatus};
use cadence_memory::{ListQuery, ScopeQuery};
use cadence_validation::{AuditLogger, AuditOutcome};
use serde_json::json;

fn manual_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.validation.mode = ValidationMode::Manual;
    config
}

async fn next_validation(events: &mut Observer) -> ValidationRequest {
    loop {
        let event = events.recv().await.expect("event stream ended before validation request");
        if let EventKind::ValidationRequired { request } = event.kind {
            return request;
        }
    }
}

fn of_kind<'a>(events: &'a [StreamEvent], kind: &str) -> Vec<&'a StreamEvent> {
    events.iter().filter(|e| e.kind.chunk_type() == kind).collect()
}

#[tokio::test]
async fn context_memories_stay_with_their_workflow() {
    let remember = format!(
        "{}\n{}",
        tool_call(
            "memory",
            json!({"operation": "add", "type": "context", "content": "Project codename is Falcon"})
        ),
        tool_call(
            "memory",
            json!({"operation": "add", "type": "user_pref", "content": "User prefers metric units"})
        ),
    );
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &remember,
        "Noted.",
        &tool_call("memory", json!({"operation": "list"})),
        "Here is what I know.",
    ]));
    let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();

    let first = orch.run("assistant", "remember these").await;
    let second = orch.run("assistant", "what do you know?").await;
    assert_eq!(first.status(), WorkflowStatus::Completed);
    assert_eq!(second.status(), WorkflowStatus::Completed);

    let listed = orch.store().tool_executions(second.id()).await.unwrap();
    let output = listed[0].output.clone().unwrap();
    assert_eq!(output["count"], 1);
    let text = output.to_string();
    assert!(text.contains("metric units"));
    assert!(!text.contains("Falcon"));

    // the first workflow still sees both
    let query = ListQuery {
        scope: ScopeQuery::new(ScopeFilter::Both),
        ..Default::default()
    };
    let own = orch.memory().list(Some(first.id()), &query).await.unwrap();
    assert_eq!(own.len(), 2);
    let context = own.iter().find(|m| m.memory_type == MemoryType::Context).unwrap();
    assert_eq!(context.workflow_id.as_ref(), Some(first.id()));
    assert!(context.expires_at.is_some());
}

#[tokio::test]
async fn approved_operation_runs() {
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("memory", json!({"operation": "add", "type": "knowledge", "content": "Rust 2024 is out"})),
        "Saved.",
    ]));
    let audit = Arc::new(AuditLogger::new());
    let orch = WorkflowOrchestrator::builder(provider, manual_config())
        .with_audit_logger(audit.clone())
        .build();

    let mut handle = orch.start("assistant", "remember that Rust 2024 is out");
    let request = next_validation(&mut handle.events).await;
    assert_eq!(request.operation, "memory");
    assert_eq!(orch.gate().pending().len(), 1);

    orch.gate().approve(&request.id, Some("fine".into())).await.unwrap();
    let outcome = handle.join().await.unwrap();

    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    assert_eq!(orch.memory().count().await.unwrap(), 1);
    assert!(orch.gate().pending().is_empty());

    let stored = orch.store().validations(outcome.id()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, ValidationStatus::Approved);
    assert_eq!(audit.entries_by_outcome(&AuditOutcome::Approved).len(), 1);
}

#[tokio::test]
async fn rejected_operation_is_skipped() {
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("memory", json!({"operation": "add", "type": "knowledge", "content": "secret"})),
        "Understood, not saved.",
    ]));
    let orch = WorkflowOrchestrator::builder(provider, manual_config()).build();

    let mut handle = orch.start("assistant", "remember the secret");
    let request = next_validation(&mut handle.events).await;
    orch.gate().reject(&request.id, "no secrets").await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    let outcome = handle.task.await.unwrap();

    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    assert_eq!(orch.memory().count().await.unwrap(), 0);
    let resolved = of_kind(&events, "validation_resolved");
    assert_eq!(resolved.len(), 1);
    let tool_end = of_kind(&events, "tool_end");
    match &tool_end[0].kind {
        EventKind::ToolEnd { success, output, .. } => {
            assert!(!success);
            assert!(output.contains("no secrets"));
        }
        other => panic!("unexpected {other:?}"),
    }

    // a decided request cannot be decided again
    assert!(orch.gate().approve(&request.id, None).await.is_err());
}

#[tokio::test]
async fn low_risk_calls_skip_the_gate_in_manual_mode() {
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("calculator", json!({"expression": "2 ^ 10"})),
        "1024",
    ]));
    let orch = WorkflowOrchestrator::builder(provider, manual_config()).build();
    let outcome = orch.run("assistant", "2 to the 10th?").await;

    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    assert!(orch.gate().history().is_empty());
    assert!(orch.gate().pending().is_empty());
}

#[tokio::test]
async fn sub_agent_iteration_cap_is_reported_to_parent() {
    let provider = Arc::new(ScriptedProvider::new(|request| {
        if ScriptedProvider::first_user_message(request) == "loop forever" {
            return Ok(tool_call("calculator", json!({"expression": "1 + 1"})));
        }
        if ScriptedProvider::has_observation(request) {
            Ok("The helper gave up.".into())
        } else {
            Ok(tool_call("delegate_agent", json!({"task": "loop forever"})))
        }
    }));
    let mut config = auto_config();
    config.sub_agents.max_iterations = 2;
    let orch = WorkflowOrchestrator::builder(provider.clone(), config).build();

    let outcome = orch.run("assistant", "delegate a loop").await;
    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    assert_eq!(outcome.answer(), Some("The helper gave up."));

    let agents = orch.store().sub_agents(outcome.id()).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, SubAgentStatus::Error);
    assert!(agents[0].error.as_ref().unwrap().contains("max iterations (2)"));
    assert_eq!(agents[0].metrics.as_ref().unwrap().iterations, 2);
    // two parent calls, two nested calls
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn parallel_group_reports_each_member_in_order() {
    let provider = Arc::new(ScriptedProvider::new(|request| {
        match ScriptedProvider::first_user_message(request) {
            "broken" => Err(ProviderError::Unreachable("model offline".into())),
            task @ ("alpha" | "beta") => Ok(format!("{task} done")),
            _ if ScriptedProvider::has_observation(request) => Ok("Two of three finished.".into()),
            _ => Ok(tool_call(
                "parallel_agents",
                json!({"tasks": [{"task": "alpha"}, {"task": "broken"}, {"task": "beta"}]}),
            )),
        }
    }));
    let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();

    let mut handle = orch.start("assistant", "fan out");
    let outcome = handle.task.await.unwrap();
    let events = handle.events.drain();
    assert_eq!(outcome.status(), WorkflowStatus::Completed);

    let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert!(executions[0].success);
    let data = executions[0].output.clone().unwrap();
    assert_eq!(data["succeeded"], 2);
    assert_eq!(data["failed"], 1);

    let results = data["results"].as_array().unwrap();
    let tasks: Vec<_> = results.iter().map(|r| r["task"].as_str().unwrap()).collect();
    assert_eq!(tasks, vec!["alpha", "broken", "beta"]);
    assert_eq!(results[0]["result"], "alpha done");
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("model offline"));

    assert_eq!(of_kind(&events, "sub_agent_start").len(), 3);
    assert_eq!(of_kind(&events, "sub_agent_complete").len(), 2);
    assert_eq!(of_kind(&events, "sub_agent_error").len(), 1);
}

#[tokio::test]
async fn event_sequences_increase_and_end_with_completion() {
    let provider = Arc::new(ScriptedProvider::new(|request| {
        match ScriptedProvider::first_user_message(request) {
            "helper task" => Ok("<thinking>easy</thinking>helper result".into()),
            _ => match ScriptedProvider::last_observation(request) {
                None => Ok(tool_call("todo", json!({"operation": "create", "title": "Write report"}))),
                Some(obs) if obs.contains("todo") => {
                    Ok(tool_call("delegate_agent", json!({"task": "helper task"})))
                }
                Some(_) => Ok("All finished with the helper result.".into()),
            },
        }
    }));
    let orch = WorkflowOrchestrator::builder(provider, auto_config()).build();

    let mut handle = orch.start("assistant", "plan and delegate");
    let outcome = handle.task.await.unwrap();
    let events = handle.events.drain();
    assert_eq!(outcome.status(), WorkflowStatus::Completed);

    let mut last_seen: HashMap<WorkflowId, u64> = HashMap::new();
    for event in &events {
        let previous = last_seen.insert(event.workflow_id.clone(), event.sequence).unwrap_or(0);
        assert!(event.sequence > previous, "sequence went backwards for {}", event.workflow_id);
    }

    let own: Vec<_> = events.iter().filter(|e| &e.workflow_id == outcome.id()).collect();
    assert_eq!(own.last().unwrap().kind.chunk_type(), "workflow_complete");
    assert_eq!(events.last().unwrap().kind.chunk_type(), "workflow_complete");
    assert_eq!(own.iter().filter(|e| e.kind.chunk_type() == "task_create").count(), 1);

    let nested: Vec<_> = events
        .iter()
        .filter(|e| e.parent_workflow_id.as_ref() == Some(outcome.id()))
        .collect();
    assert!(nested.iter().any(|e| e.kind.chunk_type() == "reasoning"));
    assert_eq!(nested.last().unwrap().kind.chunk_type(), "workflow_complete");
}

#[tokio::test]
async fn spawned_child_outliving_its_parent_completes_before_the_parent_stream() {
    let provider = ScriptedProvider::new(|request| {
        if ScriptedProvider::first_user_message(request) == "slow task" {
            return Ok("slow result".into());
        }
        if ScriptedProvider::has_observation(request) {
            Ok("Started it in the background.".into())
        } else {
            Ok(tool_call("spawn_agent", json!({"task": "slow task"})))
        }
    })
    .with_delay_for("slow task", Duration::from_millis(200));
    let orch = WorkflowOrchestrator::builder(Arc::new(provider), auto_config()).build();

    let mut handle = orch.start("assistant", "kick off");
    let outcome = handle.task.await.unwrap();
    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    // the child is still working, so the parent stream stays open
    assert!(!orch.events().is_closed(outcome.id()));

    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect).await.unwrap();

    let own: Vec<_> = events.iter().filter(|e| &e.workflow_id == outcome.id()).collect();
    assert_eq!(own.last().unwrap().kind.chunk_type(), "workflow_complete");
    assert_eq!(own.iter().filter(|e| e.kind.chunk_type() == "workflow_complete").count(), 1);
    let sequences: Vec<u64> = own.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{sequences:?}");

    let position = |kind: &str| own.iter().position(|e| e.kind.chunk_type() == kind).unwrap();
    assert!(position("sub_agent_complete") < position("workflow_complete"));

    assert!(orch.events().is_closed(outcome.id()));
    assert_eq!(orch.sub_agents().active_count(), 0);
    let agents = orch.store().sub_agents(outcome.id()).await.unwrap();
    assert_eq!(agents[0].status, SubAgentStatus::Completed);
    assert_eq!(agents[0].result.as_deref(), Some("slow result"));
}

#[tokio::test]
async fn cancel_during_validation_wait() {
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("memory", json!({"operation": "delete", "id": "m-1"})),
        "unreachable",
    ]));
    let orch = WorkflowOrchestrator::builder(provider.clone(), manual_config()).build();

    let mut handle = orch.start("assistant", "delete it");
    let request = next_validation(&mut handle.events).await;
    assert!(orch.cancel(&handle.workflow_id));

    let outcome = handle.join().await.unwrap();
    assert_eq!(outcome.status(), WorkflowStatus::Cancelled);
    assert_eq!(provider.call_count(), 1);

    let settled = orch.gate().get(&request.id).unwrap();
    assert_eq!(settled.status, ValidationStatus::Rejected);
    assert_eq!(settled.reason.as_deref(), Some("cancelled"));
    assert!(!orch.is_running(outcome.id()));

    let saved = orch.store().get_workflow(outcome.id()).await.unwrap().unwrap();
    assert_eq!(saved.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_parent_cancels_its_sub_agent() {
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("delegate_agent", json!({"task": "clean up memories"})),
        &tool_call("memory", json!({"operation": "clear_by_type", "type": "knowledge"})),
    ]));
    let orch = WorkflowOrchestrator::builder(provider, manual_config()).build();

    let mut handle = orch.start("assistant", "tidy up");
    let delegate = next_validation(&mut handle.events).await;
    orch.gate().approve(&delegate.id, None).await.unwrap();
    let nested = next_validation(&mut handle.events).await;
    assert_ne!(&nested.workflow_id, &handle.workflow_id);

    handle.cancel();
    let outcome = handle.join().await.unwrap();
    assert_eq!(outcome.status(), WorkflowStatus::Cancelled);

    let agents = orch.store().sub_agents(outcome.id()).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, SubAgentStatus::Error);
    assert_eq!(agents[0].error.as_deref(), Some("cancelled"));
    let nested_wf = orch.store().get_workflow(&agents[0].workflow_id).await.unwrap().unwrap();
    assert_eq!(nested_wf.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn external_tools_are_listed_and_called() {
    let server = Arc::new(EchoToolServer::new("docs", &["lookup"]));
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("docs:lookup", json!({"topic": "tokio"})),
        "Found it.",
    ]));
    let orch = WorkflowOrchestrator::builder(provider.clone(), auto_config())
        .with_external_server(server.clone())
        .build();

    let outcome = orch.run("assistant", "look up tokio").await;
    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    assert!(provider.requests()[0].messages[0].content.contains("docs:lookup"));

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2, json!({"topic": "tokio"}));
    let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
    assert_eq!(executions[0].output.clone().unwrap()["echo"]["topic"], "tokio");
}

#[tokio::test(start_paused = true)]
async fn slow_external_tool_times_out() {
    let server = Arc::new(EchoToolServer::new("docs", &["lookup"]).with_delay(Duration::from_secs(120)));
    let provider = Arc::new(SequentialMockProvider::texts(&[
        &tool_call("docs:lookup", json!({})),
        "The lookup timed out.",
    ]));
    let mut config = auto_config();
    config.tools.external_timeout_secs = 5;
    let orch = WorkflowOrchestrator::builder(provider, config)
        .with_external_server(server)
        .build();

    let outcome = orch.run("assistant", "look something up").await;
    assert_eq!(outcome.status(), WorkflowStatus::Completed);
    let executions = orch.store().tool_executions(outcome.id()).await.unwrap();
    assert!(!executions[0].success);
    assert!(executions[0].error.as_ref().unwrap().contains("timed out"));
}
