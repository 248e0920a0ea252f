//! Missed-run tracker (`cleanup_missed_runs.json`).
//!
//! Records scheduled work that did not happen: scheduler stalls, lock
//! contention, and failed ticks. Operators acknowledge entries per scope.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::Result;
use crate::policy::model::{Scope, optional_scope};
use crate::store::atomic::{JsonRead, read_json, write_json_atomic};

/// Oldest entries are dropped beyond this many events.
pub const MISSED_RUN_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedReason {
    SchedulerGap,
    LockHeld,
    SchedulerException,
}

impl MissedReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchedulerGap => "scheduler_gap",
            Self::LockHeld => "lock_held",
            Self::SchedulerException => "scheduler_exception",
        }
    }
}

impl fmt::Display for MissedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MissedRunEvent {
    pub at: String,
    pub reason: String,
    pub schedule_id: String,
    #[serde(with = "optional_scope")]
    pub scope: Option<Scope>,
}

impl MissedRunEvent {
    /// Explicit scope, else the `<scope>:` prefix of the schedule id.
    #[must_use]
    pub fn attributed_scope(&self) -> Option<Scope> {
        self.scope.or_else(|| {
            self.schedule_id
                .split_once(':')
                .and_then(|(prefix, _)| prefix.parse().ok())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MissedRunLog {
    pub missed_runs: Vec<MissedRunEvent>,
    pub last_ack_at: String,
    pub last_ack_by: String,
}

impl MissedRunLog {
    fn trim(&mut self) {
        if self.missed_runs.len() > MISSED_RUN_CAP {
            let excess = self.missed_runs.len() - MISSED_RUN_CAP;
            self.missed_runs.drain(..excess);
        }
    }

    /// Entries attributable to `scope`.
    pub fn for_scope(&self, scope: Scope) -> impl Iterator<Item = &MissedRunEvent> {
        self.missed_runs
            .iter()
            .filter(move |event| event.attributed_scope() == Some(scope))
    }
}

#[derive(Debug, Clone)]
pub struct MissedRunStore {
    path: PathBuf,
}

impl MissedRunStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<MissedRunLog> {
        let raw = match read_json::<Value>(&self.path)? {
            JsonRead::Loaded(raw) => raw,
            JsonRead::Missing => return Ok(MissedRunLog::default()),
            JsonRead::Unparsable(err) => {
                eprintln!(
                    "[WRT-STORE] missed-run log {} unreadable, starting empty: {err}",
                    self.path.display()
                );
                return Ok(MissedRunLog::default());
            }
        };
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let mut log = MissedRunLog {
            missed_runs: raw
                .get("missed_runs")
                .and_then(Value::as_array)
                .map(|events| {
                    events
                        .iter()
                        .filter(|event| event.is_object())
                        .filter_map(|event| serde_json::from_value(event.clone()).ok())
                        .collect()
                })
                .unwrap_or_default(),
            last_ack_at: text("last_ack_at"),
            last_ack_by: text("last_ack_by"),
        };
        log.trim();
        Ok(log)
    }

    pub fn save(&self, log: &MissedRunLog) -> Result<()> {
        let mut log = log.clone();
        log.trim();
        write_json_atomic(&self.path, &log)
    }

    pub fn record(
        &self,
        at: &str,
        reason: MissedReason,
        schedule_id: &str,
        scope: Option<Scope>,
    ) -> Result<()> {
        let mut log = self.load()?;
        log.missed_runs.push(MissedRunEvent {
            at: at.to_string(),
            reason: reason.as_str().to_string(),
            schedule_id: schedule_id.to_string(),
            scope,
        });
        self.save(&log)
    }

    /// Drop events for `scope` and events no scope can be attributed to.
    /// Returns the remaining log.
    pub fn ack(&self, scope: Scope, by: &str, at: &str) -> Result<MissedRunLog> {
        let mut log = self.load()?;
        log.missed_runs
            .retain(|event| matches!(event.attributed_scope(), Some(other) if other != scope));
        log.last_ack_at = at.to_string();
        log.last_ack_by = by.to_string();
        self.save(&log)?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT: &str = "2026-02-01T10:00:00+00:00";

    fn store() -> (tempfile::TempDir, MissedRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MissedRunStore::new(dir.path().join("cleanup_missed_runs.json"));
        (dir, store)
    }

    #[test]
    fn scope_is_inferred_from_schedule_prefix() {
        let event = MissedRunEvent {
            schedule_id: "stale_worlds:scheduler".to_string(),
            ..MissedRunEvent::default()
        };
        assert_eq!(event.attributed_scope(), Some(Scope::StaleWorlds));
        let event = MissedRunEvent {
            schedule_id: "nightly".to_string(),
            ..MissedRunEvent::default()
        };
        assert_eq!(event.attributed_scope(), None);
    }

    #[test]
    fn record_caps_log() {
        let (_dir, store) = store();
        for i in 0..(MISSED_RUN_CAP + 5) {
            store
                .record(AT, MissedReason::LockHeld, &format!("backups:s{i}"), Some(Scope::Backups))
                .unwrap();
        }
        let log = store.load().unwrap();
        assert_eq!(log.missed_runs.len(), MISSED_RUN_CAP);
        assert_eq!(log.missed_runs[0].schedule_id, "backups:s5");
        assert_eq!(log.missed_runs[0].reason, "lock_held");
    }

    #[test]
    fn ack_keeps_only_other_scope() {
        let (_dir, store) = store();
        store
            .record(AT, MissedReason::SchedulerGap, "backups:scheduler", Some(Scope::Backups))
            .unwrap();
        store
            .record(AT, MissedReason::SchedulerGap, "stale_worlds:scheduler", None)
            .unwrap();
        store
            .record(AT, MissedReason::SchedulerException, "legacy", None)
            .unwrap();

        let log = store.ack(Scope::Backups, "10.0.0.7", AT).unwrap();
        assert_eq!(log.missed_runs.len(), 1);
        assert_eq!(log.missed_runs[0].schedule_id, "stale_worlds:scheduler");
        assert_eq!(log.last_ack_by, "10.0.0.7");

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded, log);
        assert_eq!(reloaded.for_scope(Scope::StaleWorlds).count(), 1);
    }
}
