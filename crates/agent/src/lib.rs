//! The Cadence workflow orchestrator.
//!
//! A workflow is one conversation driven by a **reason → act → observe**
//! loop:
//!
//! 1. **Recall** memories relevant to the user message
//! 2. **Stream** a model response, publishing tokens as they arrive
//! 3. **Parse** `<tool_call>` blocks out of the response
//! 4. **Gate** each call through the validation policy, then **dispatch** it
//!    (sub-agent controls go to the [`SubAgentCoordinator`])
//! 5. **Observe**: feed each result back and loop to step 2
//!
//! A response without tool calls is the final answer. The loop also ends on
//! the iteration cap, a model failure, or cancellation.

pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod subagent;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use orchestrator::{OrchestratorBuilder, WorkflowHandle, WorkflowOrchestrator, WorkflowOutcome};
pub use parser::{ParsedCall, ParsedResponse, parse_response};
pub use prompt::{SUB_AGENT_PROMPT, build_system_prompt};
pub use subagent::{SubAgentCoordinator, SubTaskSpec};
