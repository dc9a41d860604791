//! Local tools and the tool dispatcher for Cadence.
//!
//! The local capability set is fixed: `memory`, `todo`, `calculator`, and the
//! sub-agent controls (routed by the orchestrator). Names of the form
//! `server:tool` go to an external tool server.

pub mod calculator;
pub mod dispatcher;
pub mod memory_tool;
pub mod target;
pub mod todo;

pub use calculator::CalculatorTool;
pub use dispatcher::{DEFAULT_EXTERNAL_TIMEOUT, ToolDispatcher, execution_record};
pub use memory_tool::{MemoryOperation, MemoryTool};
pub use target::{SubAgentControl, ToolTarget};
pub use todo::{TodoItem, TodoTool};

use cadence_core::validation::{OperationType, RiskLevel};

/// One row of the static local catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub operation: OperationType,
    pub risk: RiskLevel,
    pub note: &'static str,
}

/// Local tool names with their default risk classes, for display.
pub fn local_catalog() -> Vec<CatalogEntry> {
    use serde_json::json;

    let row = |name: &'static str, args: serde_json::Value, note: &'static str| {
        let (operation, risk) = ToolTarget::resolve(name)
            .map(|t| t.classify(&args))
            .unwrap_or((OperationType::Tool, RiskLevel::Low));
        CatalogEntry {
            name,
            operation,
            risk,
            note,
        }
    };

    let mut rows = vec![
        row("calculator", json!({}), ""),
        row("todo", json!({}), ""),
        row("memory", json!({"operation": "search"}), "describe, list, search, get"),
        row("memory", json!({"operation": "add"}), "add"),
        row("memory", json!({"operation": "delete"}), "delete, clear_by_type"),
    ];
    rows.extend(SubAgentControl::ALL.iter().map(|c| row(c.name(), json!({}), "")));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_local_name() {
        let catalog = local_catalog();
        for name in ["calculator", "todo", "memory", "spawn_agent", "sub_agent_status"] {
            assert!(catalog.iter().any(|e| e.name == name), "{name}");
        }
        let delete = catalog.iter().find(|e| e.note.starts_with("delete")).unwrap();
        assert_eq!(delete.risk, RiskLevel::High);
    }
}
