//! Retention engine: evaluation, space gate, blast-radius cap, single-flight
//! execution, and the control operations built on them.

pub mod caps;
pub mod deletion;
pub mod evaluate;
pub mod executor;
pub mod service;
pub mod space_gate;

pub use evaluate::{EvaluatedItem, Evaluation, EvaluationResult};
pub use executor::{RetentionEngine, RunPermit};
pub use service::{
    Collaborators, ControlError, ControlResult, ErrorCode, RetentionService, RunOutcome,
    SavedRules, Snapshot,
};
pub use space_gate::{GateState, evaluate_gate};
