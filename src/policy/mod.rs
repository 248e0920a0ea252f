//! Retention policy: typed model, schema migration and merge, payload
//! validation, schedule arithmetic.

pub mod merge;
pub mod migrate;
pub mod model;
pub mod schedule;
pub mod validate;

pub use model::{
    Category, EvalMode, EventKind, Interval, Meta, PolicyDocument, RuleKey, Rules, Schedule,
    Scope, ScopeProfile,
};
pub use schedule::NextRun;
pub use validate::{PayloadError, PayloadErrorKind};
