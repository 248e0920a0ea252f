//! Control operations: the surface an API layer or the CLI calls.
//!
//! Every operation is load → mutate in memory → atomic rewrite within one
//! call. Caller mistakes come back as [`ControlError::Rejected`] with a closed
//! [`ErrorCode`]; storage failures propagate as [`ControlError::Storage`].

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::config::EngineConfig;
use crate::core::errors::{Result, RetentionError};
use crate::engine::evaluate::EvaluationResult;
use crate::engine::executor::RetentionEngine;
use crate::logger::audit::{AuditEntry, AuditLog};
use crate::platform::pal::{
    ActiveWorldResolver, Clock, DiskProbe, DiskUsage, ServerPropertiesResolver, StatvfsProbe,
    SystemClock, iso_seconds,
};
use crate::policy::model::{
    EvalMode, PolicyDocument, RuleKey, Schedule, Scope, ScopeProfile, TIME_BASED_SCHEDULE_ID,
};
use crate::policy::schedule::next_run;
use crate::policy::validate::{PayloadErrorKind, validate_rules, validate_schedules};
use crate::scanner::candidates::ScanRoots;
use crate::store::config_store::PolicyStore;
use crate::store::history::{HistoryLog, HistoryRun, HistoryStore};
use crate::store::missed_runs::{MissedRunLog, MissedRunStore};

// ──────────────────── errors ────────────────────

/// Caller-facing rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationFailure,
    IneligibleSelection,
    LockHeld,
    GuardViolation,
    ScheduleConflict,
    RulesDisabled,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailure => "validation_failure",
            Self::IneligibleSelection => "ineligible_selection",
            Self::LockHeld => "lock_held",
            Self::GuardViolation => "guard_violation",
            Self::ScheduleConflict => "schedule_conflict",
            Self::RulesDisabled => "rules_disabled",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ValidationFailure => "Validation failed. Please review the submitted values.",
            Self::IneligibleSelection => {
                "One or more selected files are no longer eligible for deletion."
            }
            Self::LockHeld => "A cleanup run is already in progress. Try again shortly.",
            Self::GuardViolation => {
                "Cleanup guards blocked this operation to prevent destructive loss."
            }
            Self::ScheduleConflict => {
                "Schedule conflicts with an existing schedule at the same time."
            }
            Self::RulesDisabled => "Rule-based cleanup is disabled.",
        }
    }

    /// Whether the same request may succeed later unchanged.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::LockHeld)
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{}: {}", code.as_str(), code.message())]
    Rejected {
        code: ErrorCode,
        details: Option<Value>,
    },

    #[error(transparent)]
    Storage(RetentionError),
}

impl ControlError {
    #[must_use]
    pub const fn rejected(code: ErrorCode) -> Self {
        Self::Rejected {
            code,
            details: None,
        }
    }

    #[must_use]
    pub const fn with_details(code: ErrorCode, details: Value) -> Self {
        Self::Rejected {
            code,
            details: Some(details),
        }
    }

    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            Self::Storage(_) => None,
        }
    }

    /// `{ok:false, error_code, message, details?}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Rejected { code, details } => {
                let mut body = json!({
                    "ok": false,
                    "error_code": code.as_str(),
                    "message": code.message(),
                });
                if let Some(details) = details {
                    body["details"] = details.clone();
                }
                body
            }
            Self::Storage(err) => json!({
                "ok": false,
                "error_code": err.code(),
                "message": err.to_string(),
            }),
        }
    }
}

impl From<RetentionError> for ControlError {
    fn from(err: RetentionError) -> Self {
        match err {
            RetentionError::SafetyVeto { path, reason } => Self::with_details(
                ErrorCode::GuardViolation,
                json!({ "path": path, "reason": reason }),
            ),
            other => Self::Storage(other),
        }
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

// ──────────────────── responses ────────────────────

/// Everything a dashboard needs to render one scope.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub scope: Scope,
    pub profile: ScopeProfile,
    pub missed_runs: MissedRunLog,
    pub history: HistoryLog,
    pub storage: Option<DiskUsage>,
    pub next_run_at: String,
    pub preview: EvaluationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedRules {
    pub profile: ScopeProfile,
    pub preview: EvaluationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub dry_run: bool,
    pub result: EvaluationResult,
    pub profile: ScopeProfile,
}

// ──────────────────── service ────────────────────

/// External collaborators the service is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn DiskProbe>,
    pub clock: Arc<dyn Clock>,
    pub world: Arc<dyn ActiveWorldResolver>,
}

impl Collaborators {
    /// Real statvfs probe, system clock, and `server.properties` resolution.
    #[must_use]
    pub fn system(config: &EngineConfig) -> Self {
        Self {
            probe: Arc::new(StatvfsProbe),
            clock: Arc::new(SystemClock::new(config.scheduler.utc_offset_minutes)),
            world: Arc::new(ServerPropertiesResolver::new(
                config.world.server_properties.clone(),
                config.world.world_dir.clone(),
            )),
        }
    }
}

pub struct RetentionService {
    policy: PolicyStore,
    history: HistoryStore,
    missed: MissedRunStore,
    audit: AuditLog,
    engine: RetentionEngine,
    probe: Arc<dyn DiskProbe>,
    clock: Arc<dyn Clock>,
}

impl RetentionService {
    #[must_use]
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let paths = &config.paths;
        Self {
            policy: PolicyStore::new(paths.policy_file(), config.guards.clone()),
            history: HistoryStore::new(paths.history_file()),
            missed: MissedRunStore::new(paths.missed_runs_file()),
            audit: AuditLog::new(paths.audit_log_path()),
            engine: RetentionEngine::new(
                ScanRoots::new(&paths.backup_dir, &paths.old_worlds_dir),
                Arc::clone(&collaborators.probe),
                collaborators.world,
            ),
            probe: collaborators.probe,
            clock: collaborators.clock,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config, Collaborators::system(config))
    }

    #[must_use]
    pub const fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub const fn missed_runs(&self) -> &MissedRunStore {
        &self.missed
    }

    #[must_use]
    pub const fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    #[must_use]
    pub const fn engine(&self) -> &RetentionEngine {
        &self.engine
    }

    #[must_use]
    pub fn probe(&self) -> &dyn DiskProbe {
        self.probe.as_ref()
    }

    #[must_use]
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    /// Disk usage of the backup volume, if it can be read.
    #[must_use]
    pub fn storage(&self) -> Option<DiskUsage> {
        self.probe.usage(self.engine.backup_dir()).ok()
    }

    pub fn audit(&self, what: &str, why: &str, trigger: &str, result: &str, details: &str) {
        let stamp = iso_seconds(&self.now());
        self.audit.record(
            &stamp,
            &AuditEntry {
                what,
                why,
                trigger,
                result,
                details,
            },
        );
    }

    /// Append one history entry describing `result`.
    pub fn record_history(
        &self,
        scope: Scope,
        trigger: &str,
        result: &EvaluationResult,
        at: DateTime<FixedOffset>,
    ) -> Result<()> {
        let dry_run = !result.apply_changes;
        self.history.append(HistoryRun {
            at: iso_seconds(&at),
            trigger: trigger.to_string(),
            mode: result.mode,
            dry_run,
            deleted_count: if dry_run { 0 } else { result.deleted_count as u64 },
            errors_count: result.errors.len() as u64,
            requested_count: result.requested_delete_count as u64,
            capped_count: result.capped_delete_count as u64,
            result: result.result_label().to_string(),
            details: String::new(),
            scope: Some(scope),
        })
    }

    /// Write normalized policy, history, and missed-run files so operators
    /// see the current layout even before the first run.
    pub fn initialize_files(&self) -> Result<()> {
        if let Some(parent) = self.policy.path().parent() {
            fs::create_dir_all(parent).map_err(|e| RetentionError::io(parent, e))?;
        }
        let mut doc = self.policy.load()?;
        self.policy.save(&mut doc)?;
        self.history.save(&self.history.load()?)?;
        self.missed.save(&self.missed.load()?)?;
        Ok(())
    }

    // ──────────────────── read ────────────────────

    pub fn snapshot(&self, scope: Scope) -> ControlResult<Snapshot> {
        let doc = self.policy.load()?;
        let profile = doc.profile(scope).clone();
        let now = self.now();
        let preview =
            self.engine
                .preview(&profile.rules, &profile.meta, EvalMode::Rule, &[], now);
        Ok(Snapshot {
            scope,
            next_run_at: next_run(&profile.schedules, now).label(),
            missed_runs: self.missed.load()?,
            history: self.history.load()?,
            storage: self.storage(),
            preview,
            profile,
        })
    }

    /// Rule-mode dry run with the saved rules.
    pub fn preview(&self, scope: Scope) -> ControlResult<EvaluationResult> {
        let doc = self.policy.load()?;
        let profile = doc.profile(scope);
        Ok(self
            .engine
            .preview(&profile.rules, &profile.meta, EvalMode::Rule, &[], self.now()))
    }

    // ──────────────────── policy edits ────────────────────

    pub fn save_rules(
        &self,
        scope: Scope,
        payload: &Value,
        changed_by: &str,
    ) -> ControlResult<SavedRules> {
        let rules = validate_rules(payload).map_err(|err| {
            ControlError::with_details(ErrorCode::ValidationFailure, json!(err.message))
        })?;
        let now = self.now();
        let generated = Schedule::from_time_based(&rules.time_based, now.date_naive());
        let mut doc = self.policy.load()?;

        let profile = doc.profile_mut(scope);
        if let Some(time) = generated.as_ref().and_then(Schedule::as_time) {
            let clash = profile.schedules.iter().any(|s| {
                s.enabled
                    && s.id != TIME_BASED_SCHEDULE_ID
                    && s.as_time().is_some_and(|other| other.time == time.time)
            });
            if clash {
                return Err(ControlError::with_details(
                    ErrorCode::ScheduleConflict,
                    json!(format!("time_of_backup {} is already scheduled", time.time)),
                ));
            }
        }

        profile.rules = rules;
        profile.schedules.retain(|s| s.id != TIME_BASED_SCHEDULE_ID);
        if let Some(schedule) = generated {
            profile.schedules.insert(0, schedule);
        }
        profile.meta.rule_version += 1;
        profile.meta.schedule_version += 1;
        profile.meta.last_changed_by = changed_by.to_string();
        profile.meta.last_changed_at = iso_seconds(&now);
        let rule_version = profile.meta.rule_version;
        self.policy.save(&mut doc)?;

        self.audit(
            "save_rules",
            "manual_save",
            "manual",
            "ok",
            &format!("scope={scope};rule_version={rule_version}"),
        );
        let profile = doc.profile(scope).clone();
        let preview = self
            .engine
            .preview(&profile.rules, &profile.meta, EvalMode::Rule, &[], now);
        Ok(SavedRules { profile, preview })
    }

    pub fn save_schedules(
        &self,
        scope: Scope,
        payload: &Value,
        changed_by: &str,
    ) -> ControlResult<ScopeProfile> {
        let now = self.now();
        let schedules = validate_schedules(payload, now.date_naive()).map_err(|err| {
            let code = match err.kind {
                PayloadErrorKind::Conflict => ErrorCode::ScheduleConflict,
                PayloadErrorKind::Invalid => ErrorCode::ValidationFailure,
            };
            ControlError::with_details(code, json!(err.message))
        })?;
        let mut doc = self.policy.load()?;

        let profile = doc.profile_mut(scope);
        profile.schedules = schedules;
        profile.meta.schedule_version += 1;
        profile.meta.last_changed_by = changed_by.to_string();
        profile.meta.last_changed_at = iso_seconds(&now);
        let schedule_version = profile.meta.schedule_version;
        self.policy.save(&mut doc)?;

        self.audit(
            "save_schedules",
            "manual_save",
            "manual",
            "ok",
            &format!("scope={scope};schedule_version={schedule_version}"),
        );
        Ok(doc.profile(scope).clone())
    }

    // ──────────────────── runs ────────────────────

    /// Run the saved rules now, or just one of them when `rule_key` names it.
    pub fn run_rules(
        &self,
        scope: Scope,
        rule_key: Option<&str>,
        dry_run: bool,
        changed_by: &str,
    ) -> ControlResult<RunOutcome> {
        let key = match rule_key.map(str::trim).filter(|k| !k.is_empty()) {
            None => None,
            Some(raw) => Some(raw.parse::<RuleKey>().map_err(|msg| {
                ControlError::with_details(ErrorCode::ValidationFailure, json!(msg))
            })?),
        };
        let label = key.map_or("all", RuleKey::as_str);
        let now = self.now();
        let mut doc = self.policy.load()?;

        let profile = doc.profile_mut(scope);
        if !profile.rules.enabled {
            return Err(ControlError::rejected(ErrorCode::RulesDisabled));
        }
        let rules = key.map_or_else(|| profile.rules.clone(), |k| profile.rules.only(k));

        if dry_run {
            let result = self
                .engine
                .preview(&rules, &profile.meta, EvalMode::Rule, &[], now);
            let profile = profile.clone();
            self.record_history(scope, &format!("manual_rule:{label}"), &result, now)?;
            self.audit(
                "run_rules",
                "manual_apply_dry_run",
                "manual_rule",
                "dry_run",
                &format!(
                    "scope={scope};rule={label};requested={};capped={};by={changed_by}",
                    result.requested_delete_count, result.capped_delete_count
                ),
            );
            return Ok(RunOutcome {
                dry_run,
                result,
                profile,
            });
        }

        let result = self
            .engine
            .run_with_lock(&rules, &mut profile.meta, EvalMode::Rule, "manual_rule", &[], now)
            .ok_or_else(|| ControlError::rejected(ErrorCode::LockHeld))?;
        self.policy.save(&mut doc)?;
        self.record_history(scope, &format!("manual_rule:{label}"), &result, now)?;
        self.audit(
            "run_rules",
            "manual_apply",
            "manual_rule",
            result.result_label(),
            &format!(
                "scope={scope};rule={label};deleted={};errors={};by={changed_by}",
                result.deleted_count,
                result.errors.len()
            ),
        );
        Ok(RunOutcome {
            dry_run,
            result,
            profile: doc.profile(scope).clone(),
        })
    }

    /// Delete exactly the operator's selection, or nothing at all.
    pub fn manual_delete(
        &self,
        scope: Scope,
        selected: &[PathBuf],
        dry_run: bool,
        changed_by: &str,
    ) -> ControlResult<RunOutcome> {
        let now = self.now();
        let mut doc = self.policy.load()?;

        let profile = doc.profile_mut(scope);
        let preview =
            self.engine
                .preview(&profile.rules, &profile.meta, EvalMode::Manual, selected, now);
        if !preview.selected_ineligible.is_empty() {
            return Err(self.reject_selection(&preview.selected_ineligible));
        }

        if dry_run {
            let profile = profile.clone();
            self.record_history(scope, "manual_selection", &preview, now)?;
            self.audit(
                "manual_delete",
                "manual_selection_dry_run",
                "manual_selection",
                "dry_run",
                &format!(
                    "scope={scope};selected={};capped={};by={changed_by}",
                    selected.len(),
                    preview.capped_delete_count
                ),
            );
            return Ok(RunOutcome {
                dry_run,
                result: preview,
                profile,
            });
        }

        let result = self
            .engine
            .run_with_lock(
                &profile.rules,
                &mut profile.meta,
                EvalMode::Manual,
                "manual_selection",
                selected,
                now,
            )
            .ok_or_else(|| ControlError::rejected(ErrorCode::LockHeld))?;
        if !result.selected_ineligible.is_empty() {
            // Eligibility changed between preview and apply; nothing was deleted.
            return Err(self.reject_selection(&result.selected_ineligible));
        }
        self.policy.save(&mut doc)?;
        self.record_history(scope, "manual_selection", &result, now)?;
        self.audit(
            "manual_delete",
            "manual_selection",
            "manual_selection",
            result.result_label(),
            &format!(
                "scope={scope};deleted={};errors={};by={changed_by}",
                result.deleted_count,
                result.errors.len()
            ),
        );
        Ok(RunOutcome {
            dry_run,
            result,
            profile: doc.profile(scope).clone(),
        })
    }

    fn reject_selection(&self, paths: &[PathBuf]) -> ControlError {
        self.audit(
            "manual_delete",
            "manual_selection",
            "manual",
            "ineligible_selection",
            &format!("count={}", paths.len()),
        );
        ControlError::with_details(ErrorCode::IneligibleSelection, json!({ "paths": paths }))
    }

    // ──────────────────── missed runs ────────────────────

    pub fn ack_missed_runs(&self, scope: Scope, by: &str) -> ControlResult<MissedRunLog> {
        let log = self.missed.ack(scope, by, &iso_seconds(&self.now()))?;
        self.audit(
            "ack_missed_runs",
            "manual_ack",
            "manual",
            "ok",
            &format!("scope={scope};by={by}"),
        );
        Ok(log)
    }

    /// Load the policy document for callers that mutate it themselves.
    pub fn load_policy(&self) -> Result<PolicyDocument> {
        self.policy.load()
    }

    pub fn save_policy(&self, doc: &mut PolicyDocument) -> Result<()> {
        self.policy.save(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::{FixedProbe, FixedWorld, ManualClock};
    use chrono::TimeZone;

    fn service() -> (tempfile::TempDir, RetentionService) {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let mut config = EngineConfig::default();
        config.paths.backup_dir = root.join("backups");
        config.paths.old_worlds_dir = root.join("old_worlds");
        config.paths.data_dir = root.join("data");
        fs::create_dir_all(&config.paths.backup_dir).unwrap();
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_780_000_000, 0)
            .unwrap();
        let service = RetentionService::new(
            &config,
            Collaborators {
                probe: Arc::new(FixedProbe::new(DiskUsage::from_bytes(1_000, 900))),
                clock: Arc::new(ManualClock::new(now)),
                world: Arc::new(FixedWorld(None)),
            },
        );
        (dir, service)
    }

    #[test]
    fn error_json_has_code_and_fixed_message() {
        let err = ControlError::with_details(ErrorCode::LockHeld, json!("busy"));
        let body = err.to_json();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error_code"], "lock_held");
        assert_eq!(
            body["message"],
            "A cleanup run is already in progress. Try again shortly."
        );
        assert_eq!(body["details"], "busy");
        assert!(ControlError::rejected(ErrorCode::RulesDisabled).to_json().get("details").is_none());
    }

    #[test]
    fn safety_veto_maps_to_guard_violation() {
        let err: ControlError = RetentionError::SafetyVeto {
            path: PathBuf::from("/x"),
            reason: "symlink".to_string(),
        }
        .into();
        assert_eq!(err.code(), Some(ErrorCode::GuardViolation));
    }

    #[test]
    fn save_rules_bumps_versions_and_regenerates_schedule() {
        let (_dir, service) = service();
        let payload = json!({
            "time_based": { "time_of_backup": "04:15", "repeat_mode": "daily" }
        });
        let saved = service.save_rules(Scope::Backups, &payload, "10.0.0.5").unwrap();
        assert_eq!(saved.profile.meta.rule_version, 2);
        assert_eq!(saved.profile.meta.schedule_version, 2);
        assert_eq!(saved.profile.meta.last_changed_by, "10.0.0.5");
        assert_eq!(saved.profile.schedules.len(), 1);
        assert_eq!(saved.profile.schedules[0].id, TIME_BASED_SCHEDULE_ID);
        assert!(saved.profile.rules.categories.backup_zip);
        assert!(!saved.profile.rules.categories.stale_world_dir);

        let log = fs::read_to_string(service.audit_log().path()).unwrap();
        assert!(log.contains("what=save_rules | why=manual_save"));
        assert!(log.contains("details=scope=backups;rule_version=2"));
    }

    #[test]
    fn invalid_rules_are_rejected_without_writing() {
        let (_dir, service) = service();
        let err = service
            .save_rules(Scope::Backups, &json!({ "space": { "used_trigger_pct": 10 } }), "op")
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ValidationFailure));
        assert!(!service.policy().path().exists());
    }

    #[test]
    fn conflicting_schedules_are_rejected() {
        let (_dir, service) = service();
        let payload = json!([
            { "mode": "time", "interval": "daily", "time": "02:00" },
            { "mode": "time", "interval": "weekly", "time": "02:00" },
        ]);
        let err = service
            .save_schedules(Scope::StaleWorlds, &payload, "op")
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ScheduleConflict));
    }

    #[test]
    fn run_rules_rejects_unknown_key_and_disabled_rules() {
        let (_dir, service) = service();
        let err = service
            .run_rules(Scope::Backups, Some("size"), true, "op")
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ValidationFailure));

        service
            .save_rules(Scope::Backups, &json!({ "enabled": false }), "op")
            .unwrap();
        let err = service.run_rules(Scope::Backups, None, false, "op").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RulesDisabled));
    }

    #[test]
    fn run_rules_reports_lock_held() {
        let (_dir, service) = service();
        let _permit = service.engine().try_acquire().unwrap();
        let err = service.run_rules(Scope::Backups, None, false, "op").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LockHeld));
        assert!(ErrorCode::LockHeld.is_retryable());
        // Dry runs ignore the lock.
        assert!(service.run_rules(Scope::Backups, Some("age"), true, "op").is_ok());
    }

    #[test]
    fn dry_run_records_history() {
        let (_dir, service) = service();
        let outcome = service
            .run_rules(Scope::StaleWorlds, Some("count"), true, "op")
            .unwrap();
        assert!(outcome.dry_run);
        let history = service.history().load().unwrap();
        assert_eq!(history.runs.len(), 1);
        assert_eq!(history.runs[0].trigger, "manual_rule:count");
        assert_eq!(history.runs[0].result, "dry_run");
        assert_eq!(history.runs[0].scope, Some(Scope::StaleWorlds));
    }
}
