//! Validation for Cadence — risk policy, the human approval gate, and the
//! decision audit log.
//!
//! - **Policy**: decides whether a classified operation must wait for a human
//! - **Gate**: suspends the calling step until approval, rejection, timeout
//!   or cancellation
//! - **Audit**: every gate event is recorded and forwarded to sinks

pub mod audit;
pub mod gate;
pub mod policy;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use gate::{GateOutcome, ValidationGate};
pub use policy::ValidationPolicy;
