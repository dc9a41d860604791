//! Validation request types shared by the gate, the tools and configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::workflow::WorkflowId;

/// Category of a gated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Tool,
    SubAgent,
    ExternalTool,
    FileOp,
    DbOp,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::SubAgent => "sub_agent",
            Self::ExternalTool => "external_tool",
            Self::FileOp => "file_op",
            Self::DbOp => "db_op",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level, ordered from least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

/// Gate policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Nothing is gated
    Auto,
    /// Everything at or above the auto-approve threshold is gated
    #[default]
    Manual,
    /// Gated per operation category
    Selective,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "selective" => Ok(Self::Selective),
            other => Err(format!("unknown validation mode '{other}'")),
        }
    }
}

/// What happens when nobody answers a validation request in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    #[default]
    Reject,
    Approve,
    Reprompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Who settled a validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Human,
    Timeout,
    Policy,
}

/// A gated operation awaiting (or past) a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub id: String,
    pub workflow_id: WorkflowId,
    pub operation_type: OperationType,

    /// Human-readable label, usually the tool name
    pub operation: String,

    pub risk_level: RiskLevel,
    pub status: ValidationStatus,

    /// Arbitrary structured details (tool arguments etc.)
    #[serde(default)]
    pub details: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<DecidedBy>,

    #[serde(default)]
    pub reprompts: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ValidationRequest {
    pub fn new(
        workflow_id: WorkflowId,
        operation_type: OperationType,
        operation: impl Into<String>,
        risk_level: RiskLevel,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id,
            operation_type,
            operation: operation.into(),
            risk_level,
            status: ValidationStatus::Pending,
            details,
            reason: None,
            decided_by: None,
            reprompts: 0,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ValidationStatus::Pending
    }

    /// Record a decision.
    pub fn decide(&mut self, decision: &ValidationDecision, by: DecidedBy) {
        self.status = if decision.approved {
            ValidationStatus::Approved
        } else {
            ValidationStatus::Rejected
        };
        self.reason = decision.reason.clone();
        self.decided_by = Some(by);
        self.decided_at = Some(Utc::now());
    }
}

/// The answer delivered to a suspended step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationDecision {
    pub fn approve(reason: Option<String>) -> Self {
        Self { approved: true, reason }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn operation_type_serializes_snake_case() {
        let json = serde_json::to_string(&OperationType::ExternalTool).unwrap();
        assert_eq!(json, r#""external_tool""#);
    }

    #[test]
    fn decide_records_outcome() {
        let mut req = ValidationRequest::new(
            WorkflowId::from("wf"),
            OperationType::DbOp,
            "memory",
            RiskLevel::High,
            serde_json::json!({"operation": "delete"}),
        );
        assert!(req.is_pending());
        req.decide(&ValidationDecision::reject("no"), DecidedBy::Human);
        assert_eq!(req.status, ValidationStatus::Rejected);
        assert_eq!(req.reason.as_deref(), Some("no"));
        assert!(req.decided_at.is_some());
    }

    #[test]
    fn validation_mode_parses() {
        assert_eq!("selective".parse::<ValidationMode>().unwrap(), ValidationMode::Selective);
        assert_eq!(ValidationMode::default(), ValidationMode::Manual);
    }
}
