//! ValidationGate — suspends a workflow step until a human decides.
//!
//! A gated step opens a [`ValidationRequest`], announces it with a
//! `validation_required` event and waits on a oneshot channel raced against
//! the configured timeout and the workflow's cancellation token. Whoever
//! settles the request first (a human via [`ValidationGate::approve`] /
//! [`ValidationGate::reject`], the timeout policy, or cancellation) wins;
//! the request is then immutable.

use cadence_config::ValidationConfig;
use cadence_core::cancel::CancellationToken;
use cadence_core::error::ValidationError;
use cadence_core::event::{EventBus, EventKind, EventOrigin};
use cadence_core::store::WorkflowStore;
use cadence_core::validation::{
    DecidedBy, OperationType, RiskLevel, TimeoutBehavior, ValidationDecision, ValidationRequest,
    ValidationStatus,
};
use cadence_core::workflow::WorkflowId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::policy::ValidationPolicy;

/// What the gate decided for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Policy let the operation through without a request.
    Proceed,
    Approved(ValidationRequest),
    Rejected(ValidationRequest),
}

impl GateOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    pub fn request(&self) -> Option<&ValidationRequest> {
        match self {
            Self::Proceed => None,
            Self::Approved(r) | Self::Rejected(r) => Some(r),
        }
    }
}

struct PendingEntry {
    request: ValidationRequest,
    origin: EventOrigin,
    tx: oneshot::Sender<ValidationRequest>,
}

/// Decided requests kept in memory; older ones are only in the store.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

#[derive(Default)]
struct GateState {
    pending: HashMap<String, PendingEntry>,
    decided: VecDeque<ValidationRequest>,
}

pub struct ValidationGate {
    policy: ValidationPolicy,
    timeout: Duration,
    on_timeout: TimeoutBehavior,
    max_reprompts: u32,
    events: Arc<EventBus>,
    store: Arc<dyn WorkflowStore>,
    audit: Arc<AuditLogger>,
    history_limit: usize,
    state: Mutex<GateState>,
}

fn outcome_of(request: &ValidationRequest) -> AuditOutcome {
    if request.is_pending() {
        AuditOutcome::Pending
    } else if request.status == ValidationStatus::Approved {
        AuditOutcome::Approved
    } else {
        AuditOutcome::Rejected
    }
}

fn actor(by: DecidedBy) -> &'static str {
    match by {
        DecidedBy::Human => "human",
        DecidedBy::Timeout => "timeout",
        DecidedBy::Policy => "policy",
    }
}

impl ValidationGate {
    pub fn new(config: &ValidationConfig, events: Arc<EventBus>, store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            policy: ValidationPolicy::from_config(config),
            timeout: Duration::from_secs(config.timeout_secs),
            on_timeout: config.on_timeout,
            max_reprompts: config.max_reprompts,
            events,
            store,
            audit: Arc::new(AuditLogger::default()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn requires_validation(&self, operation_type: OperationType, risk: RiskLevel) -> bool {
        self.policy.requires_gate(operation_type, risk)
    }

    /// Apply the policy and, if needed, wait for a decision.
    ///
    /// Returns [`GateOutcome::Proceed`] without creating a request when the
    /// policy does not gate the operation.
    pub async fn check(
        &self,
        origin: &EventOrigin,
        operation_type: OperationType,
        operation: &str,
        risk: RiskLevel,
        details: serde_json::Value,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        if !self.requires_validation(operation_type, risk) {
            debug!(
                workflow_id = %origin.workflow_id,
                operation,
                risk = %risk,
                "Operation passes validation policy"
            );
            return GateOutcome::Proceed;
        }

        let request = ValidationRequest::new(
            origin.workflow_id.clone(),
            operation_type,
            operation,
            risk,
            details,
        );
        let decided = self.wait_for_decision(origin, request, cancel).await;
        if decided.status == ValidationStatus::Approved {
            GateOutcome::Approved(decided)
        } else {
            GateOutcome::Rejected(decided)
        }
    }

    async fn wait_for_decision(
        &self,
        origin: &EventOrigin,
        request: ValidationRequest,
        cancel: &CancellationToken,
    ) -> ValidationRequest {
        let (tx, mut rx) = oneshot::channel();
        let opened = request.clone();
        let request_id = request.id.clone();
        self.lock().pending.insert(
            request_id.clone(),
            PendingEntry {
                request: request.clone(),
                origin: origin.clone(),
                tx,
            },
        );

        info!(
            workflow_id = %request.workflow_id,
            request_id = %request_id,
            operation = %request.operation,
            risk = %request.risk_level,
            "Validation required"
        );
        self.persist(&request).await;
        self.audit.log(
            AuditEvent::Requested {
                request_id: request_id.clone(),
                operation_type: request.operation_type,
                risk_level: request.risk_level,
            },
            "gate",
            &request.operation,
            AuditOutcome::Pending,
            None,
        );
        self.events.publish_from(origin, EventKind::ValidationRequired { request });

        let mut reprompts = 0u32;
        loop {
            tokio::select! {
                waited = tokio::time::timeout(self.timeout, &mut rx) => match waited {
                    Ok(Ok(decided)) => return decided,
                    Ok(Err(_)) => {
                        // Sender dropped without a decision
                        let decision = ValidationDecision::reject("validation gate closed");
                        return self.settle_or_take(&opened, decision, DecidedBy::Policy, &mut rx).await;
                    }
                    Err(_) => {
                        let decision = match self.on_timeout {
                            TimeoutBehavior::Approve => {
                                ValidationDecision::approve(Some("approved on timeout".into()))
                            }
                            TimeoutBehavior::Reject => {
                                ValidationDecision::reject("timed out waiting for approval")
                            }
                            TimeoutBehavior::Reprompt if reprompts < self.max_reprompts => {
                                reprompts += 1;
                                self.reprompt(&request_id, reprompts).await;
                                continue;
                            }
                            TimeoutBehavior::Reprompt => ValidationDecision::reject(format!(
                                "timed out after {reprompts} re-prompts"
                            )),
                        };
                        return self.settle_or_take(&opened, decision, DecidedBy::Timeout, &mut rx).await;
                    }
                },
                _ = cancel.cancelled() => {
                    let decision = ValidationDecision::reject("cancelled");
                    return self.settle_or_take(&opened, decision, DecidedBy::Policy, &mut rx).await;
                }
            }
        }
    }

    /// Settle internally, or pick up a decision that raced in first.
    async fn settle_or_take(
        &self,
        opened: &ValidationRequest,
        decision: ValidationDecision,
        by: DecidedBy,
        rx: &mut oneshot::Receiver<ValidationRequest>,
    ) -> ValidationRequest {
        match self.settle(&opened.id, decision.clone(), by).await {
            Ok(decided) => decided,
            Err(_) => match rx.try_recv() {
                Ok(decided) => decided,
                Err(_) => {
                    warn!(request_id = %opened.id, "Validation request settled without notifying its waiter");
                    let mut request = self.get(&opened.id).unwrap_or_else(|| opened.clone());
                    if request.is_pending() {
                        request.decide(&decision, by);
                    }
                    request
                }
            },
        }
    }

    async fn reprompt(&self, request_id: &str, reprompts: u32) {
        let announced = {
            let mut state = self.lock();
            state.pending.get_mut(request_id).map(|entry| {
                entry.request.reprompts = reprompts;
                (entry.request.clone(), entry.origin.clone())
            })
        };
        let Some((request, origin)) = announced else {
            return;
        };

        info!(request_id, reprompts, "Validation timed out; re-prompting");
        self.persist(&request).await;
        self.audit.log(
            AuditEvent::Reprompted {
                request_id: request_id.to_string(),
                reprompts,
            },
            "timeout",
            &request.operation,
            AuditOutcome::Pending,
            None,
        );
        self.events.publish_from(&origin, EventKind::ValidationRequired { request });
    }

    /// Approve a pending request.
    pub async fn approve(&self, request_id: &str, reason: Option<String>) -> Result<ValidationRequest, ValidationError> {
        self.settle(request_id, ValidationDecision::approve(reason), DecidedBy::Human).await
    }

    /// Reject a pending request.
    pub async fn reject(&self, request_id: &str, reason: impl Into<String>) -> Result<ValidationRequest, ValidationError> {
        self.settle(request_id, ValidationDecision::reject(reason), DecidedBy::Human).await
    }

    async fn settle(
        &self,
        request_id: &str,
        decision: ValidationDecision,
        by: DecidedBy,
    ) -> Result<ValidationRequest, ValidationError> {
        let (decided, origin, tx) = {
            let mut state = self.lock();
            let Some(entry) = state.pending.remove(request_id) else {
                return Err(match state.decided.iter().find(|r| r.id == request_id) {
                    Some(done) => ValidationError::AlreadyDecided {
                        id: request_id.to_string(),
                        status: done.status.as_str().to_string(),
                    },
                    None => ValidationError::NotFound(request_id.to_string()),
                });
            };
            let mut request = entry.request;
            request.decide(&decision, by);
            if state.decided.len() >= self.history_limit {
                state.decided.pop_front();
            }
            state.decided.push_back(request.clone());
            (request, entry.origin, entry.tx)
        };

        info!(
            workflow_id = %decided.workflow_id,
            request_id,
            status = decided.status.as_str(),
            decided_by = actor(by),
            reason = ?decided.reason,
            "Validation resolved"
        );
        self.persist(&decided).await;
        self.audit.log(
            AuditEvent::Decided {
                request_id: request_id.to_string(),
            },
            actor(by),
            &decided.operation,
            outcome_of(&decided),
            decided.reason.clone(),
        );
        self.events.publish_from(
            &origin,
            EventKind::ValidationResolved {
                request_id: request_id.to_string(),
                status: decided.status,
                reason: decided.reason.clone(),
            },
        );
        // The waiter may be gone (cancelled task); that is fine.
        let _ = tx.send(decided.clone());
        Ok(decided)
    }

    async fn persist(&self, request: &ValidationRequest) {
        if let Err(e) = self.store.save_validation(request).await {
            warn!(request_id = %request.id, error = %e, "Failed to persist validation request");
        }
    }

    /// Undecided requests, oldest first.
    pub fn pending(&self) -> Vec<ValidationRequest> {
        let mut pending: Vec<_> = self.lock().pending.values().map(|e| e.request.clone()).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    pub fn pending_for(&self, workflow_id: &WorkflowId) -> Vec<ValidationRequest> {
        self.pending()
            .into_iter()
            .filter(|r| &r.workflow_id == workflow_id)
            .collect()
    }

    /// Recently decided requests in decision order.
    pub fn history(&self) -> Vec<ValidationRequest> {
        self.lock().decided.iter().cloned().collect()
    }

    /// Every request a workflow raised, read back from the store.
    pub async fn history_for(&self, workflow_id: &WorkflowId) -> Result<Vec<ValidationRequest>, ValidationError> {
        let mut requests = self
            .store
            .validations(workflow_id)
            .await
            .map_err(|e| ValidationError::Store(e.to_string()))?;
        requests.retain(|r| !r.is_pending());
        Ok(requests)
    }

    pub fn get(&self, request_id: &str) -> Option<ValidationRequest> {
        let state = self.lock();
        state
            .pending
            .get(request_id)
            .map(|e| e.request.clone())
            .or_else(|| state.decided.iter().find(|r| r.id == request_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::cancel::CancellationHandle;
    use cadence_core::store::InMemoryWorkflowStore;
    use cadence_core::validation::{ValidationMode, ValidationStatus};
    use serde_json::json;

    fn config(mode: ValidationMode, on_timeout: TimeoutBehavior) -> ValidationConfig {
        ValidationConfig {
            mode,
            on_timeout,
            timeout_secs: 60,
            ..ValidationConfig::default()
        }
    }

    struct Fixture {
        gate: Arc<ValidationGate>,
        events: Arc<EventBus>,
        store: InMemoryWorkflowStore,
    }

    fn fixture(config: ValidationConfig) -> Fixture {
        let events = Arc::new(EventBus::new());
        let store = InMemoryWorkflowStore::new();
        let gate = ValidationGate::new(&config, events.clone(), Arc::new(store.clone()))
            .with_audit(Arc::new(AuditLogger::new()));
        Fixture {
            gate: Arc::new(gate),
            events,
            store,
        }
    }

    fn origin() -> EventOrigin {
        EventOrigin::workflow(WorkflowId::from("wf"))
    }

    fn spawn_check(gate: &Arc<ValidationGate>, token: CancellationToken) -> tokio::task::JoinHandle<GateOutcome> {
        let gate = gate.clone();
        tokio::spawn(async move {
            gate.check(
                &origin(),
                OperationType::DbOp,
                "memory",
                RiskLevel::High,
                json!({"operation": "delete"}),
                &token,
            )
            .await
        })
    }

    async fn next_request_id(observer: &mut cadence_core::event::Observer) -> String {
        loop {
            let event = observer.recv().await.unwrap();
            if let EventKind::ValidationRequired { request } = event.kind {
                return request.id;
            }
        }
    }

    #[tokio::test]
    async fn low_risk_proceeds_without_request() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let outcome = f
            .gate
            .check(
                &origin(),
                OperationType::Tool,
                "calculator",
                RiskLevel::Low,
                json!({}),
                &CancellationToken::never(),
            )
            .await;
        assert_eq!(outcome, GateOutcome::Proceed);
        assert!(f.gate.pending().is_empty());
        assert!(f.gate.history().is_empty());
    }

    #[tokio::test]
    async fn waits_until_approved() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let mut observer = f.events.attach(&WorkflowId::from("wf"));
        let task = spawn_check(&f.gate, CancellationToken::never());

        let id = next_request_id(&mut observer).await;
        assert_eq!(f.gate.pending().len(), 1);
        assert!(!task.is_finished());

        let approved = f.gate.approve(&id, Some("looks fine".into())).await.unwrap();
        assert_eq!(approved.status, ValidationStatus::Approved);

        let outcome = task.await.unwrap();
        assert!(outcome.is_allowed());
        assert_eq!(outcome.request().unwrap().decided_by, Some(DecidedBy::Human));
        assert!(f.gate.pending().is_empty());
        assert_eq!(f.gate.history().len(), 1);

        let resolved = observer.recv().await.unwrap();
        assert_eq!(resolved.kind.chunk_type(), "validation_resolved");
        let persisted = f.store.validations(&WorkflowId::from("wf")).await.unwrap();
        assert_eq!(persisted[0].status, ValidationStatus::Approved);
    }

    #[tokio::test]
    async fn rejection_is_reported_and_final() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let mut observer = f.events.attach(&WorkflowId::from("wf"));
        let task = spawn_check(&f.gate, CancellationToken::never());
        let id = next_request_id(&mut observer).await;

        f.gate.reject(&id, "too risky").await.unwrap();
        let outcome = task.await.unwrap();
        assert!(!outcome.is_allowed());
        assert_eq!(outcome.request().unwrap().reason.as_deref(), Some("too risky"));

        let again = f.gate.approve(&id, None).await.unwrap_err();
        assert!(matches!(again, ValidationError::AlreadyDecided { .. }));
        let unknown = f.gate.approve("nope", None).await.unwrap_err();
        assert!(matches!(unknown, ValidationError::NotFound(_)));

        let entries = f.gate.audit().entries_for(&id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_by_default() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let outcome = spawn_check(&f.gate, CancellationToken::never()).await.unwrap();
        let request = outcome.request().unwrap();
        assert!(!outcome.is_allowed());
        assert_eq!(request.decided_by, Some(DecidedBy::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_can_approve() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Approve));
        let outcome = spawn_check(&f.gate, CancellationToken::never()).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Approved(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn reprompts_then_rejects() {
        let f = fixture(ValidationConfig {
            max_reprompts: 2,
            ..config(ValidationMode::Manual, TimeoutBehavior::Reprompt)
        });
        let mut observer = f.events.attach(&WorkflowId::from("wf"));
        let outcome = spawn_check(&f.gate, CancellationToken::never()).await.unwrap();

        let request = outcome.request().unwrap();
        assert!(!outcome.is_allowed());
        assert_eq!(request.reprompts, 2);

        let announcements = observer
            .drain()
            .into_iter()
            .filter(|e| e.kind.chunk_type() == "validation_required")
            .count();
        assert_eq!(announcements, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_after_reprompt_wins() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reprompt));
        let mut observer = f.events.attach(&WorkflowId::from("wf"));
        let task = spawn_check(&f.gate, CancellationToken::never());

        let id = next_request_id(&mut observer).await;
        // second announcement of the same request
        assert_eq!(next_request_id(&mut observer).await, id);
        f.gate.approve(&id, None).await.unwrap();

        let outcome = task.await.unwrap();
        assert!(outcome.is_allowed());
        assert_eq!(outcome.request().unwrap().reprompts, 1);
    }

    #[tokio::test]
    async fn cancellation_rejects_pending_request() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let mut observer = f.events.attach(&WorkflowId::from("wf"));
        let handle = CancellationHandle::new();
        let task = spawn_check(&f.gate, handle.token());
        next_request_id(&mut observer).await;

        handle.cancel();
        let outcome = task.await.unwrap();
        assert!(!outcome.is_allowed());
        assert_eq!(outcome.request().unwrap().reason.as_deref(), Some("cancelled"));
        assert!(f.gate.pending().is_empty());
    }

    #[tokio::test]
    async fn history_keeps_only_recent_decisions() {
        let f = fixture(config(ValidationMode::Manual, TimeoutBehavior::Reject));
        let gate = Arc::new(
            ValidationGate::new(
                &config(ValidationMode::Manual, TimeoutBehavior::Reject),
                f.events.clone(),
                Arc::new(f.store.clone()),
            )
            .with_history_limit(2),
        );
        let mut observer = f.events.attach(&WorkflowId::from("wf"));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = spawn_check(&gate, CancellationToken::never());
            let id = next_request_id(&mut observer).await;
            gate.approve(&id, None).await.unwrap();
            task.await.unwrap();
            ids.push(id);
        }

        let recent: Vec<_> = gate.history().into_iter().map(|r| r.id).collect();
        assert_eq!(recent, ids[1..].to_vec());
        assert!(gate.get(&ids[0]).is_none());

        let all = gate.history_for(&WorkflowId::from("wf")).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.status == ValidationStatus::Approved));
    }

    #[tokio::test]
    async fn auto_mode_with_force_gate() {
        let f = fixture(ValidationConfig {
            force_gate_at: Some(RiskLevel::Critical),
            ..config(ValidationMode::Auto, TimeoutBehavior::Reject)
        });
        assert!(!f.gate.requires_validation(OperationType::FileOp, RiskLevel::High));
        assert!(f.gate.requires_validation(OperationType::FileOp, RiskLevel::Critical));
    }
}
