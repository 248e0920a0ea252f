//! Local JSON persistence: policy document, run history, missed-run log.

pub mod atomic;
pub mod config_store;
pub mod history;
pub mod missed_runs;

pub use config_store::PolicyStore;
pub use history::{HistoryLog, HistoryRun, HistoryStore};
pub use missed_runs::{MissedReason, MissedRunEvent, MissedRunLog, MissedRunStore};
