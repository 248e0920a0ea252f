//! Bounded run history (`cleanup_history.json`).

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::Result;
use crate::policy::model::{EvalMode, Scope, optional_scope};
use crate::store::atomic::{JsonRead, read_json, write_json_atomic};

/// Oldest entries are dropped beyond this many runs.
pub const HISTORY_CAP: usize = 500;

/// One evaluation, applied or dry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryRun {
    pub at: String,
    pub trigger: String,
    pub mode: EvalMode,
    pub dry_run: bool,
    pub deleted_count: u64,
    pub errors_count: u64,
    pub requested_count: u64,
    pub capped_count: u64,
    pub result: String,
    pub details: String,
    #[serde(with = "optional_scope")]
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryLog {
    pub runs: Vec<HistoryRun>,
}

impl HistoryLog {
    fn trim(&mut self) {
        if self.runs.len() > HISTORY_CAP {
            let excess = self.runs.len() - HISTORY_CAP;
            self.runs.drain(..excess);
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the log. Missing or corrupt files read as empty; entries that
    /// are not objects are skipped individually.
    pub fn load(&self) -> Result<HistoryLog> {
        let raw = match read_json::<Value>(&self.path)? {
            JsonRead::Loaded(raw) => raw,
            JsonRead::Missing => return Ok(HistoryLog::default()),
            JsonRead::Unparsable(err) => {
                eprintln!(
                    "[WRT-STORE] history {} unreadable, starting empty: {err}",
                    self.path.display()
                );
                return Ok(HistoryLog::default());
            }
        };
        let mut log = HistoryLog {
            runs: raw
                .get("runs")
                .and_then(Value::as_array)
                .map(|runs| {
                    runs.iter()
                        .filter(|entry| entry.is_object())
                        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                        .collect()
                })
                .unwrap_or_default(),
        };
        log.trim();
        Ok(log)
    }

    pub fn save(&self, log: &HistoryLog) -> Result<()> {
        let mut log = log.clone();
        log.trim();
        write_json_atomic(&self.path, &log)
    }

    pub fn append(&self, run: HistoryRun) -> Result<()> {
        let mut log = self.load()?;
        log.runs.push(run);
        self.save(&log)
    }
}
