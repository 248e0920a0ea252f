//! Background scheduler: one tick per interval, both scopes per tick.
//!
//! Each scope tick is load → detect gap → collect due schedules → run each
//! through the single-flight engine → persist. A tick that errors or panics
//! is recorded as a `scheduler_exception` missed run and the loop carries on.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use crossbeam_channel::{Receiver, after, select};
use parking_lot::Mutex;

use crate::core::config::SchedulerConfig;
use crate::core::errors::Result;
use crate::engine::service::RetentionService;
use crate::platform::pal::iso_seconds;
use crate::policy::model::{EvalMode, EventKind, PolicyDocument, Scope, ScheduleTrigger};
use crate::policy::schedule::due_now;
use crate::store::missed_runs::MissedReason;

/// One schedule that is due in this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Firing {
    schedule_id: String,
    trigger: String,
    why: &'static str,
}

/// What a single tick did, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Trigger labels of runs that executed.
    pub fired: Vec<String>,
    /// Missed-run entries recorded (gaps, lock contention, failures).
    pub missed: usize,
}

#[derive(Debug, Default)]
struct SchedulerState {
    boot_fired: HashSet<Scope>,
}

pub struct Scheduler {
    service: Arc<RetentionService>,
    settings: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    #[must_use]
    pub fn new(service: Arc<RetentionService>, settings: SchedulerConfig) -> Self {
        Self {
            service,
            settings,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    #[must_use]
    pub const fn service(&self) -> &Arc<RetentionService> {
        &self.service
    }

    /// Write normalized files once so operators see current state on disk.
    pub fn start(&self) {
        if let Err(err) = self.service.initialize_files() {
            eprintln!("[WRT-SCHED] failed to initialize data files: {err}");
        }
    }

    /// Tick until `shutdown` fires or disconnects. A message on `tick_now`
    /// runs the next tick immediately.
    pub fn run(&self, shutdown: &Receiver<()>, tick_now: &Receiver<()>) {
        self.start();
        let interval = Duration::from_secs(self.settings.tick_interval_secs.max(1));
        loop {
            let report = self.tick();
            if !report.fired.is_empty() || report.missed > 0 {
                eprintln!(
                    "[WRT-SCHED] tick: fired={} missed={}",
                    report.fired.len(),
                    report.missed
                );
            }
            select! {
                recv(shutdown) -> _ => break,
                recv(tick_now) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                }
                recv(after(interval)) -> _ => {}
            }
        }
        eprintln!("[WRT-SCHED] scheduler stopped");
    }

    /// Run one tick over both scopes. Never panics and never returns an error;
    /// failures become missed-run entries.
    pub fn tick(&self) -> TickReport {
        self.service.audit_log().try_recover();
        let now = self.service.now();
        let mut report = TickReport::default();
        for scope in Scope::ALL {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.tick_scope(scope, now, &mut report)
            }));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            eprintln!("[WRT-SCHED] tick failed for {scope}: {failure}");
            self.record_missed(
                &report_stamp(now),
                MissedReason::SchedulerException,
                &format!("{scope}:scheduler"),
                scope,
                &mut report,
            );
        }
        report
    }

    /// Run every enabled event schedule for `event`, in both scopes.
    pub fn fire_event(&self, event: EventKind) -> Result<TickReport> {
        let now = self.service.now();
        let mut report = TickReport::default();
        let mut doc = self.service.load_policy()?;
        for scope in Scope::ALL {
            let firings: Vec<Firing> = doc
                .profile(scope)
                .schedules
                .iter()
                .filter(|s| s.enabled && s.as_event().is_some_and(|e| e.event == event))
                .map(|s| Firing {
                    schedule_id: s.id.clone(),
                    trigger: format!("event:{scope}:{event}"),
                    why: "event_trigger",
                })
                .collect();
            for firing in firings {
                self.execute(&mut doc, scope, &firing, "event_run", now, &mut report)?;
            }
        }
        self.service.save_policy(&mut doc)?;
        Ok(report)
    }

    fn tick_scope(
        &self,
        scope: Scope,
        now: DateTime<FixedOffset>,
        report: &mut TickReport,
    ) -> Result<()> {
        let mut doc = self.service.load_policy()?;
        let now_unix = now.timestamp();

        let last_tick = doc.profile(scope).meta.last_scheduler_tick;
        let gap = i64::try_from(self.settings.gap_threshold_secs).unwrap_or(i64::MAX);
        if last_tick > 0 && now_unix.saturating_sub(last_tick) > gap {
            eprintln!(
                "[WRT-SCHED] {scope}: {}s since previous tick",
                now_unix.saturating_sub(last_tick)
            );
            self.record_missed(
                &report_stamp(now),
                MissedReason::SchedulerGap,
                &format!("{scope}:scheduler"),
                scope,
                report,
            );
        }
        doc.profile_mut(scope).meta.last_scheduler_tick = now_unix;

        let firings = self.due_firings(&doc, scope, now);
        for firing in &firings {
            self.execute(&mut doc, scope, firing, "scheduled_run", now, report)?;
        }
        self.service.save_policy(&mut doc)
    }

    fn due_firings(&self, doc: &PolicyDocument, scope: Scope, now: DateTime<FixedOffset>) -> Vec<Firing> {
        let profile = doc.profile(scope);
        let now_unix = now.timestamp();
        let suppression = i64::try_from(self.settings.refire_suppression_secs).unwrap_or(i64::MAX);
        let mut used_pct: Option<Option<f64>> = None;
        let mut firings = Vec::new();

        for schedule in profile.schedules.iter().filter(|s| s.enabled) {
            let due = match &schedule.trigger {
                ScheduleTrigger::Time(time) => {
                    let recently = profile
                        .meta
                        .schedule_last_fired
                        .get(&schedule.id)
                        .is_some_and(|&at| now_unix.saturating_sub(at) < suppression);
                    due_now(time, &now) && !recently
                }
                ScheduleTrigger::Event(event) => match event.event {
                    // At most one boot run per scope, claimed by the first enabled boot schedule.
                    EventKind::ServerBoot => self.state.lock().boot_fired.insert(scope),
                    EventKind::LowFreeSpace => {
                        let threshold = event
                            .used_trigger_pct
                            .unwrap_or(profile.rules.space.used_trigger_pct);
                        let used = *used_pct
                            .get_or_insert_with(|| self.service.storage().map(|u| u.used_pct));
                        used.is_some_and(|pct| pct >= f64::from(threshold))
                    }
                    EventKind::ServerShutdown => false,
                },
            };
            if !due {
                continue;
            }
            let (label, why) = match &schedule.trigger {
                ScheduleTrigger::Time(_) => (schedule.id.clone(), "time"),
                ScheduleTrigger::Event(event) => (event.event.as_str().to_string(), "event"),
            };
            firings.push(Firing {
                schedule_id: schedule.id.clone(),
                trigger: format!("scheduled:{scope}:{label}"),
                why,
            });
        }
        firings
    }

    fn execute(
        &self,
        doc: &mut PolicyDocument,
        scope: Scope,
        firing: &Firing,
        what: &str,
        now: DateTime<FixedOffset>,
        report: &mut TickReport,
    ) -> Result<()> {
        let profile = doc.profile_mut(scope);
        profile
            .meta
            .schedule_last_fired
            .insert(firing.schedule_id.clone(), now.timestamp());
        let rules = profile.rules.clone();
        let Some(result) = self.service.engine().run_with_lock(
            &rules,
            &mut profile.meta,
            EvalMode::Rule,
            &firing.trigger,
            &[],
            now,
        ) else {
            eprintln!("[WRT-SCHED] {}: run already in progress", firing.trigger);
            self.record_missed(
                &report_stamp(now),
                MissedReason::LockHeld,
                &format!("{scope}:{}", firing.schedule_id),
                scope,
                report,
            );
            return Ok(());
        };

        // The fire time must reach disk even if the history append below fails.
        self.service.save_policy(doc)?;
        self.service.record_history(scope, &firing.trigger, &result, now)?;
        self.service.audit(
            what,
            firing.why,
            &firing.trigger,
            result.result_label(),
            &format!(
                "scope={scope};deleted={};errors={}",
                result.deleted_count,
                result.errors.len()
            ),
        );
        report.fired.push(firing.trigger.clone());
        Ok(())
    }

    fn record_missed(
        &self,
        stamp: &str,
        reason: MissedReason,
        schedule_id: &str,
        scope: Scope,
        report: &mut TickReport,
    ) {
        report.missed += 1;
        if let Err(err) = self
            .service
            .missed_runs()
            .record(stamp, reason, schedule_id, Some(scope))
        {
            eprintln!("[WRT-SCHED] failed to record missed run {reason} for {schedule_id}: {err}");
        }
    }
}

fn report_stamp(now: DateTime<FixedOffset>) -> String {
    iso_seconds(&now)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::engine::service::Collaborators;
    use crate::platform::pal::{Clock, DiskUsage, FixedProbe, FixedWorld, ManualClock};
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;
    use std::fs;

    struct Harness {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        probe: Arc<FixedProbe>,
        scheduler: Scheduler,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let mut config = EngineConfig::default();
        config.paths.backup_dir = root.join("backups");
        config.paths.old_worlds_dir = root.join("old_worlds");
        config.paths.data_dir = root.join("data");
        fs::create_dir_all(&config.paths.backup_dir).unwrap();
        // 2026-03-02 (a Monday) 03:59:30 UTC.
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 2, 3, 59, 30)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let probe = Arc::new(FixedProbe::new(DiskUsage::from_bytes(1_000, 500)));
        let service = Arc::new(RetentionService::new(
            &config,
            Collaborators {
                probe: probe.clone(),
                clock: clock.clone(),
                world: Arc::new(FixedWorld(None)),
            },
        ));
        Harness {
            _dir: dir,
            clock,
            probe,
            scheduler: Scheduler::new(service, config.scheduler),
        }
    }

    fn save(h: &Harness, scope: Scope, schedules: serde_json::Value) {
        h.scheduler
            .service()
            .save_schedules(scope, &schedules, "test")
            .unwrap();
    }

    #[test]
    fn time_schedule_fires_once_per_minute() {
        let h = harness();
        save(
            &h,
            Scope::Backups,
            json!([{ "id": "nightly", "mode": "time", "interval": "daily", "time": "04:00" }]),
        );
        assert!(h.scheduler.tick().fired.is_empty());

        h.clock.advance(TimeDelta::seconds(30));
        assert_eq!(h.scheduler.tick().fired, ["scheduled:backups:nightly"]);

        h.clock.advance(TimeDelta::seconds(20));
        assert!(h.scheduler.tick().fired.is_empty());

        let history = h.scheduler.service().history().load().unwrap();
        assert_eq!(history.runs.len(), 1);
        assert_eq!(history.runs[0].trigger, "scheduled:backups:nightly");
        assert!(!history.runs[0].dry_run);
    }

    #[test]
    fn boot_event_fires_once_per_process() {
        let h = harness();
        save(
            &h,
            Scope::StaleWorlds,
            json!([{ "id": "on-boot", "mode": "event", "event": "server_boot" }]),
        );
        assert_eq!(h.scheduler.tick().fired, ["scheduled:stale_worlds:server_boot"]);
        h.clock.advance(TimeDelta::seconds(30));
        assert!(h.scheduler.tick().fired.is_empty());
    }

    #[test]
    fn several_boot_schedules_in_one_scope_run_once() {
        let h = harness();
        save(
            &h,
            Scope::Backups,
            json!([
                { "id": "boot-a", "mode": "event", "event": "server_boot" },
                { "id": "boot-b", "mode": "event", "event": "server_boot" }
            ]),
        );
        assert_eq!(h.scheduler.tick().fired, ["scheduled:backups:server_boot"]);
        let history = h.scheduler.service().history().load().unwrap();
        assert_eq!(history.runs.len(), 1);
    }

    #[test]
    fn boot_schedule_added_after_first_tick_still_runs_once() {
        let h = harness();
        assert!(h.scheduler.tick().fired.is_empty());

        save(
            &h,
            Scope::Backups,
            json!([{ "id": "on-boot", "mode": "event", "event": "server_boot" }]),
        );
        h.clock.advance(TimeDelta::seconds(30));
        assert_eq!(h.scheduler.tick().fired, ["scheduled:backups:server_boot"]);
        h.clock.advance(TimeDelta::seconds(30));
        assert!(h.scheduler.tick().fired.is_empty());
    }

    #[test]
    fn failed_history_append_does_not_refire_time_schedule() {
        let h = harness();
        let service = Arc::clone(h.scheduler.service());
        let mut doc = service.load_policy().unwrap();
        let rules = &mut doc.profile_mut(Scope::Backups).rules;
        rules.age.enabled = true;
        rules.age.days = 30;
        rules.count.enabled = false;
        rules.space.enabled = false;
        rules.caps.max_absolute = 1;
        service.save_policy(&mut doc).unwrap();
        save(
            &h,
            Scope::Backups,
            json!([{ "id": "nightly", "mode": "time", "interval": "daily", "time": "04:00" }]),
        );

        let backups = service.policy().path().parent().unwrap().parent().unwrap().join("backups");
        let old = h.clock.now().timestamp() - 60 * 86_400;
        for i in 0..5 {
            let path = backups.join(format!("world_{i}.zip"));
            fs::write(&path, b"zip").unwrap();
            let stamp = filetime::FileTime::from_unix_time(old + i, 0);
            filetime::set_file_mtime(&path, stamp).unwrap();
        }
        // A directory in place of the history file makes every append fail.
        fs::create_dir_all(service.history().path()).unwrap();

        h.clock.advance(TimeDelta::seconds(30));
        let first = h.scheduler.tick();
        assert!(first.fired.is_empty());
        assert_eq!(first.missed, 1);
        assert_eq!(fs::read_dir(&backups).unwrap().count(), 4);

        h.clock.advance(TimeDelta::seconds(20));
        let second = h.scheduler.tick();
        assert!(second.fired.is_empty());
        assert_eq!(fs::read_dir(&backups).unwrap().count(), 4);

        let doc = service.load_policy().unwrap();
        assert!(doc.profile(Scope::Backups).meta.schedule_last_fired.contains_key("nightly"));
    }

    #[test]
    fn bad_field_in_one_scope_keeps_other_scope_schedules() {
        let h = harness();
        let store = h.scheduler.service().policy();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            json!({
                "schema_version": 2,
                "scopes": {
                    "backups": {
                        "schedules": [{ "id": "nightly", "mode": "time", "interval": "daily", "time": "04:00" }]
                    },
                    "stale_worlds": { "rules": { "age": { "days": "often" } } }
                }
            })
            .to_string(),
        )
        .unwrap();

        h.scheduler.tick();
        h.clock.advance(TimeDelta::seconds(30));
        assert_eq!(h.scheduler.tick().fired, ["scheduled:backups:nightly"]);

        let doc = h.scheduler.service().load_policy().unwrap();
        assert_eq!(doc.profile(Scope::Backups).schedules.len(), 1);
        assert!(fs::read_to_string(store.preserved_path()).unwrap().contains("often"));
    }

    #[test]
    fn low_free_space_follows_usage() {
        let h = harness();
        save(
            &h,
            Scope::Backups,
            json!([{ "id": "pressure", "mode": "event", "event": "low_free_space", "used_trigger_pct": 90 }]),
        );
        assert!(h.scheduler.tick().fired.is_empty());
        h.probe.set_used_pct(95.0);
        h.clock.advance(TimeDelta::seconds(30));
        assert_eq!(h.scheduler.tick().fired, ["scheduled:backups:low_free_space"]);
    }

    #[test]
    fn gap_is_recorded_as_missed_run() {
        let h = harness();
        h.scheduler.tick();
        h.clock.advance(TimeDelta::seconds(200));
        let report = h.scheduler.tick();
        assert_eq!(report.missed, 2);
        let log = h.scheduler.service().missed_runs().load().unwrap();
        assert!(log.missed_runs.iter().all(|e| e.reason == "scheduler_gap"));
        assert_eq!(log.for_scope(Scope::Backups).count(), 1);
    }

    #[test]
    fn busy_engine_records_lock_held() {
        let h = harness();
        save(
            &h,
            Scope::Backups,
            json!([{ "id": "on-boot", "mode": "event", "event": "server_boot" }]),
        );
        let service = Arc::clone(h.scheduler.service());
        let _permit = service.engine().try_acquire().unwrap();
        let report = h.scheduler.tick();
        assert!(report.fired.is_empty());
        let log = service.missed_runs().load().unwrap();
        assert_eq!(log.missed_runs.len(), 1);
        assert_eq!(log.missed_runs[0].reason, "lock_held");
        assert_eq!(log.missed_runs[0].schedule_id, "backups:on-boot");
    }

    #[test]
    fn unreadable_policy_becomes_scheduler_exception() {
        let h = harness();
        let policy = h.scheduler.service().policy().path().to_path_buf();
        // A directory where the policy file should be makes every save fail.
        fs::create_dir_all(&policy).unwrap();
        let report = h.scheduler.tick();
        assert_eq!(report.missed, 2);
        let log = h.scheduler.service().missed_runs().load().unwrap();
        assert!(log.missed_runs.iter().all(|e| e.reason == "scheduler_exception"));
    }

    #[test]
    fn fire_event_runs_matching_schedules() {
        let h = harness();
        save(
            &h,
            Scope::Backups,
            json!([{ "id": "stop", "mode": "event", "event": "server_shutdown" }]),
        );
        assert!(h.scheduler.tick().fired.is_empty());
        let report = h.scheduler.fire_event(EventKind::ServerShutdown).unwrap();
        assert_eq!(report.fired, ["event:backups:server_shutdown"]);
        let audit = fs::read_to_string(h.scheduler.service().audit_log().path()).unwrap();
        assert!(audit.contains("what=event_run | why=event_trigger"));
    }

    #[test]
    fn run_loop_stops_on_shutdown() {
        let h = harness();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (_tick_tx, tick_rx) = crossbeam_channel::bounded::<()>(1);
        stop_tx.send(()).unwrap();
        h.scheduler.run(&stop_rx, &tick_rx);
        assert!(h.scheduler.service().policy().path().exists());
    }
}
