//! # Cadence Core
//!
//! Domain types, collaborator traits, and error definitions for the Cadence
//! agent orchestrator. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! The orchestrator talks to the outside world only through traits defined
//! here: the language model ([`Provider`]), the external tool server
//! ([`ExternalToolServer`]), workflow persistence ([`WorkflowStore`]) and
//! memory storage ([`MemoryBackend`]). This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock collaborators
//! - Clean dependency graph (all crates depend inward on core)

pub mod cancel;
pub mod error;
pub mod event;
pub mod external;
pub mod memory;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;
pub mod validation;
pub mod workflow;

// Re-export key types at crate root for ergonomics
pub use cancel::{CancellationHandle, CancellationToken};
pub use error::{Error, Result};
pub use event::{EventBus, EventKind, EventOrigin, Observer, ObserverId, StreamEvent, TaskStatus};
pub use external::{ExternalToolInfo, ExternalToolServer};
pub use memory::{
    Embedder, Memory, MemoryBackend, MemoryFilter, MemoryMetadata, MemoryScope, MemoryType,
    ScopeFilter,
};
pub use message::{Message, MessageMetrics, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use store::{InMemoryWorkflowStore, WorkflowStore};
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolExecution, ToolResult};
pub use validation::{
    DecidedBy, OperationType, RiskLevel, TimeoutBehavior, ValidationDecision, ValidationMode,
    ValidationRequest, ValidationStatus,
};
pub use workflow::{
    ActiveSubAgent, SubAgentMetrics, SubAgentMode, SubAgentStatus, Workflow, WorkflowId,
    WorkflowStatus,
};
