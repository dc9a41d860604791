//! When does an operation need a human?
//!
//! Rules, first match wins:
//! 1. `force_gate_at` is set and risk is at or above it → gate
//! 2. risk is below `auto_approve_below` → proceed
//! 3. by mode: `auto` proceeds, `manual` gates, `selective` gates when the
//!    operation's category flag is on

use cadence_config::{SelectiveGates, ValidationConfig};
use cadence_core::validation::{OperationType, RiskLevel, ValidationMode};

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub mode: ValidationMode,
    pub auto_approve_below: RiskLevel,
    pub force_gate_at: Option<RiskLevel>,
    pub selective: SelectiveGates,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from_config(&ValidationConfig::default())
    }
}

impl ValidationPolicy {
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            mode: config.mode,
            auto_approve_below: config.auto_approve_below,
            force_gate_at: config.force_gate_at,
            selective: config.selective.clone(),
        }
    }

    pub fn requires_gate(&self, operation: OperationType, risk: RiskLevel) -> bool {
        if self.force_gate_at.is_some_and(|floor| risk >= floor) {
            return true;
        }
        if risk < self.auto_approve_below {
            return false;
        }
        match self.mode {
            ValidationMode::Auto => false,
            ValidationMode::Manual => true,
            ValidationMode::Selective => self.selective.gates(operation),
        }
    }
}
