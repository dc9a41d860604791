//! Audit logging — structured record of every validation gate event.

use cadence_core::validation::{OperationType, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Who acted: `human`, `timeout`, `policy` or `gate`
    pub actor: String,
    /// The gated operation label
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable gate events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A request was opened and the step suspended
    Requested {
        request_id: String,
        operation_type: OperationType,
        risk_level: RiskLevel,
    },
    /// The wait timed out and the request was announced again
    Reprompted { request_id: String, reprompts: u32 },
    /// The request was settled
    Decided { request_id: String },
}

/// Outcome of an audited gate event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Pending,
    Approved,
    Rejected,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Audit logger that keeps entries in memory and forwards them to sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an audit event.
    pub fn log(&self, event: AuditEvent, actor: &str, target: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        self.lock().push(entry.clone());

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock().iter().filter(|e| &e.outcome == outcome).cloned().collect()
    }

    /// Entries concerning one request.
    pub fn entries_for(&self, request_id: &str) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| match &e.event {
                AuditEvent::Requested { request_id: id, .. }
                | AuditEvent::Reprompted { request_id: id, .. }
                | AuditEvent::Decided { request_id: id } => id == request_id,
            })
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn requested(id: &str) -> AuditEvent {
        AuditEvent::Requested {
            request_id: id.into(),
            operation_type: OperationType::DbOp,
            risk_level: RiskLevel::High,
        }
    }

    #[test]
    fn log_and_filter() {
        let logger = AuditLogger::new();
        logger.log(requested("r1"), "gate", "memory", AuditOutcome::Pending, None);
        logger.log(
            AuditEvent::Decided { request_id: "r1".into() },
            "human",
            "memory",
            AuditOutcome::Rejected,
            Some("not now".into()),
        );
        logger.log(requested("r2"), "gate", "calculator", AuditOutcome::Pending, None);

        assert_eq!(logger.count(), 3);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Pending).len(), 2);
        let r1 = logger.entries_for("r1");
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[1].actor, "human");
    }

    #[test]
    fn entry_serialization() {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event: AuditEvent::Reprompted {
                request_id: "r1".into(),
                reprompts: 2,
            },
            actor: "timeout".into(),
            target: "fs:write_file".into(),
            outcome: AuditOutcome::Pending,
            details: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "reprompted");
        let back: AuditEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.event, entry.event);
    }

    #[test]
    fn custom_sink_receives_events() {
        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.target.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);
        logger.log(requested("r1"), "gate", "spawn_agent", AuditOutcome::Pending, None);

        assert_eq!(*received.lock().unwrap(), vec!["spawn_agent".to_string()]);
    }

    #[test]
    fn debug_format() {
        let logger = AuditLogger::default();
        let debug_str = format!("{logger:?}");
        assert!(debug_str.contains("entry_count"));
        assert!(debug_str.contains("sink_count: 1"));
    }
}
