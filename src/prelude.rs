//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use world_retention::prelude::*;
//! ```

// Core
pub use crate::core::config::EngineConfig;
pub use crate::core::errors::{Result, RetentionError};

// Platform
pub use crate::platform::pal::{
    ActiveWorldResolver, Clock, DiskProbe, DiskUsage, FixedProbe, FixedWorld, ManualClock,
    ServerPropertiesResolver, StatvfsProbe, SystemClock,
};

// Policy
pub use crate::policy::model::{Category, EvalMode, EventKind, PolicyDocument, Rules, Scope};

// Engine
pub use crate::engine::evaluate::{EvaluatedItem, EvaluationResult};
pub use crate::engine::executor::RetentionEngine;
pub use crate::engine::service::{
    Collaborators, ControlError, ErrorCode, RetentionService, RunOutcome, Snapshot,
};

// Scheduler
pub use crate::daemon::scheduler::{Scheduler, TickReport};
