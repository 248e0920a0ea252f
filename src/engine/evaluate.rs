//! Rule evaluation: guards, age/count/space selection, blast-radius cap, and
//! (when applying) deletion.
//!
//! The same path serves previews and real runs. With `apply = false` nothing
//! on disk changes and the returned gate state is meant to be discarded.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::Serialize;

use crate::engine::caps::blast_radius_cap;
use crate::engine::deletion::delete_target;
use crate::engine::space_gate::{GateDecision, GateState, evaluate_gate, reclaim_target_bytes};
use crate::platform::pal::{DiskProbe, DiskUsage};
use crate::policy::model::{Category, EvalMode, Rules};
use crate::scanner::buckets::BackupBucket;
use crate::scanner::candidates::{Candidate, Reason, ScanRoots, scan};

/// Filesystem-facing inputs shared by every evaluation.
pub struct EvalInputs<'a> {
    pub roots: &'a ScanRoots,
    pub probe: &'a dyn DiskProbe,
    pub active_world: Option<&'a Path>,
}

/// What to evaluate.
#[derive(Debug, Clone)]
pub struct EvalRequest<'a> {
    pub rules: &'a Rules,
    pub gate: GateState,
    pub mode: EvalMode,
    pub selected: &'a [PathBuf],
    pub apply: bool,
    pub now: DateTime<FixedOffset>,
}

/// One candidate as reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluatedItem {
    pub name: String,
    pub path: PathBuf,
    pub category: Category,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub eligible: bool,
    pub selected_for_delete: bool,
    pub reasons: Vec<Reason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationResult {
    pub ok: bool,
    pub mode: EvalMode,
    pub apply_changes: bool,
    pub eligible_count: usize,
    pub requested_delete_count: usize,
    pub capped_delete_count: usize,
    /// Items removed, or for a dry run the items that would be.
    pub deleted_count: usize,
    pub deleted_bytes: u64,
    pub errors: Vec<String>,
    pub items: Vec<EvaluatedItem>,
    pub selected_ineligible: Vec<PathBuf>,
}

impl EvaluationResult {
    /// `dry_run`, `partial` (some deletions failed), or `ok`.
    #[must_use]
    pub fn result_label(&self) -> &'static str {
        if !self.apply_changes {
            "dry_run"
        } else if self.errors.is_empty() {
            "ok"
        } else {
            "partial"
        }
    }

    /// Paths in the capped delete set, oldest first.
    #[must_use]
    pub fn delete_set(&self) -> Vec<&Path> {
        let mut selected: Vec<&EvaluatedItem> =
            self.items.iter().filter(|i| i.selected_for_delete).collect();
        selected.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));
        selected.into_iter().map(|i| i.path.as_path()).collect()
    }
}

/// Result plus the gate state to commit if the run is real.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub result: EvaluationResult,
    pub gate: GateState,
}

/// Insertion-ordered, de-duplicated selection of candidate indices.
#[derive(Default)]
struct Picks {
    order: Vec<usize>,
    seen: BTreeSet<usize>,
}

impl Picks {
    fn add(&mut self, idx: usize) -> bool {
        let fresh = self.seen.insert(idx);
        if fresh {
            self.order.push(idx);
        }
        fresh
    }

    fn contains(&self, idx: usize) -> bool {
        self.seen.contains(&idx)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// Evaluate `request` against the artifacts currently on disk.
#[must_use]
pub fn evaluate(inputs: &EvalInputs<'_>, request: &EvalRequest<'_>) -> Evaluation {
    let rules = request.rules;
    let mut candidates = scan(inputs.roots, &rules.categories, inputs.active_world);

    let by_category = group_eligible(&candidates);
    apply_hard_guards(&mut candidates, &by_category, rules);
    let eligible_count = candidates.iter().filter(|c| c.eligible).count();

    let mut picks = Picks::default();
    let mut selected_ineligible = Vec::new();
    let mut gate = request.gate;

    match request.mode {
        EvalMode::Manual => {
            select_manual(&mut candidates, request.selected, &mut picks, &mut selected_ineligible);
        }
        EvalMode::Rule if rules.enabled && eligible_count > 0 => {
            let usage = probe_usage(inputs, rules);
            let now_unix = request.now.timestamp();
            let decision = evaluate_gate(&rules.space, request.gate, usage.map(|u| u.used_pct), now_unix);
            gate = decision.next;
            let cutoff = age_cutoff(request.now, rules.age.days);
            select_backups(&mut candidates, &by_category, rules, decision, cutoff, &mut picks);
            select_non_backups(&mut candidates, &by_category, rules, decision, usage, cutoff, &mut picks);
        }
        EvalMode::Rule => {}
    }

    let mut ordered = picks.order;
    ordered.sort_by(|&a, &b| {
        candidates[a]
            .mtime
            .cmp(&candidates[b].mtime)
            .then_with(|| candidates[a].path.cmp(&candidates[b].path))
    });
    let cap = blast_radius_cap(&rules.caps, eligible_count);
    let targets: Vec<usize> = ordered.iter().take(cap).copied().collect();

    let mut deleted = Vec::with_capacity(targets.len());
    let mut errors = Vec::new();
    if request.apply {
        for &idx in &targets {
            let candidate = &candidates[idx];
            match delete_target(&candidate.path, candidate.is_dir) {
                Ok(()) => deleted.push(idx),
                Err(err) => errors.push(format!("{}: {err}", candidate.name)),
            }
        }
    } else {
        deleted.clone_from(&targets);
    }

    let target_set: BTreeSet<usize> = targets.iter().copied().collect();
    let items = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| EvaluatedItem {
            name: c.name.clone(),
            path: c.path.clone(),
            category: c.category,
            size: c.size_bytes,
            mtime: c.mtime,
            eligible: c.eligible,
            selected_for_delete: target_set.contains(&idx),
            reasons: c.reasons.iter().copied().collect(),
        })
        .collect();

    Evaluation {
        result: EvaluationResult {
            ok: true,
            mode: request.mode,
            apply_changes: request.apply,
            eligible_count,
            requested_delete_count: ordered.len(),
            capped_delete_count: targets.len(),
            deleted_count: deleted.len(),
            deleted_bytes: deleted.iter().map(|&i| candidates[i].size_bytes).sum(),
            errors,
            items,
            selected_ineligible,
        },
        gate,
    }
}

// ──────────────────── guards ────────────────────

/// Scan-eligible candidate indices per category, newest first.
fn group_eligible(candidates: &[Candidate]) -> BTreeMap<Category, Vec<usize>> {
    let mut groups: BTreeMap<Category, Vec<usize>> = BTreeMap::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.eligible {
            groups.entry(candidate.category).or_default().push(idx);
        }
    }
    groups
}

/// Newest N per category, plus the newest eligible candidate overall, become
/// ineligible whatever the rules say.
fn apply_hard_guards(
    candidates: &mut [Candidate],
    by_category: &BTreeMap<Category, Vec<usize>>,
    rules: &Rules,
) {
    let newest_n = usize::try_from(rules.guards.newest_n_protected).unwrap_or(usize::MAX);
    let mut protected: BTreeSet<usize> = by_category
        .values()
        .flat_map(|rows| rows.iter().take(newest_n).copied())
        .collect();
    if rules.guards.protect_last_backup
        && let Some(newest) = candidates.iter().position(|c| c.eligible)
    {
        protected.insert(newest);
    }
    for idx in protected {
        candidates[idx].block(Reason::HardGuard);
    }
}

// ──────────────────── manual ────────────────────

/// Any selection that is unknown or ineligible rejects the whole selection.
fn select_manual(
    candidates: &mut [Candidate],
    selected: &[PathBuf],
    picks: &mut Picks,
    rejected: &mut Vec<PathBuf>,
) {
    for path in selected {
        match candidates.iter().position(|c| c.path == *path) {
            Some(idx) if candidates[idx].eligible => {
                picks.add(idx);
                candidates[idx].reasons.insert(Reason::ManualSelection);
            }
            Some(idx) => {
                candidates[idx].reasons.insert(Reason::IneligibleSelection);
                rejected.push(path.clone());
            }
            None => rejected.push(path.clone()),
        }
    }
    rejected.sort();
    rejected.dedup();
    if !rejected.is_empty() {
        picks.clear();
    }
}

// ──────────────────── rule mode ────────────────────

fn probe_usage(inputs: &EvalInputs<'_>, rules: &Rules) -> Option<DiskUsage> {
    if !rules.space.enabled {
        return None;
    }
    match inputs.probe.usage(&inputs.roots.backup_dir) {
        Ok(usage) => Some(usage),
        Err(err) => {
            eprintln!("[WRT-ENGINE] space rule skipped, usage unavailable: {err}");
            None
        }
    }
}

fn age_cutoff(now: DateTime<FixedOffset>, days: u32) -> DateTime<Utc> {
    now.with_timezone(&Utc)
        .checked_sub_signed(TimeDelta::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Backups are selected only when every enabled rule agrees.
fn select_backups(
    candidates: &mut [Candidate],
    by_category: &BTreeMap<Category, Vec<usize>>,
    rules: &Rules,
    gate: GateDecision,
    cutoff: DateTime<Utc>,
    picks: &mut Picks,
) {
    let mut over_keep = BTreeSet::new();
    if let Some(rows) = by_category.get(&Category::BackupZip) {
        let mut ranks: BTreeMap<BackupBucket, u32> = BTreeMap::new();
        for &idx in rows {
            let bucket = BackupBucket::classify(&candidates[idx].name);
            let rank = ranks.entry(bucket).or_insert(0);
            if *rank >= bucket.keep_limit(&rules.count) {
                over_keep.insert(idx);
            }
            *rank += 1;
        }
    }

    let space_ok = !rules.space.enabled || gate.fire;
    for (idx, candidate) in candidates.iter_mut().enumerate() {
        if !candidate.eligible || candidate.category != Category::BackupZip {
            continue;
        }
        let age_ok = !rules.age.enabled || candidate.mtime <= cutoff;
        let count_ok = !rules.count.enabled || over_keep.contains(&idx);
        if !(age_ok && count_ok && space_ok) {
            continue;
        }
        picks.add(idx);
        if rules.age.enabled {
            candidate.reasons.insert(Reason::AgeRule);
        }
        if rules.count.enabled {
            candidate.reasons.insert(Reason::CountRule);
        }
        if rules.space.enabled {
            candidate.reasons.insert(Reason::SpaceReclaim);
        }
    }
}

/// World snapshots: age or count selects; a firing space gate then adds the
/// oldest remaining ones until projected free space reaches the target.
fn select_non_backups(
    candidates: &mut [Candidate],
    by_category: &BTreeMap<Category, Vec<usize>>,
    rules: &Rules,
    gate: GateDecision,
    usage: Option<DiskUsage>,
    cutoff: DateTime<Utc>,
    picks: &mut Picks,
) {
    let pool: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.eligible && c.category != Category::BackupZip)
        .map(|(idx, _)| idx)
        .collect();
    if pool.is_empty() {
        return;
    }

    if rules.age.enabled {
        for &idx in &pool {
            if candidates[idx].mtime <= cutoff {
                picks.add(idx);
                candidates[idx].reasons.insert(Reason::AgeRule);
            }
        }
    }

    if rules.count.enabled {
        let keep = usize::try_from(rules.count.max_per_category).unwrap_or(usize::MAX);
        for (category, rows) in by_category {
            if *category == Category::BackupZip {
                continue;
            }
            for (rank, &idx) in rows.iter().enumerate() {
                if rank >= keep && candidates[idx].eligible {
                    picks.add(idx);
                    candidates[idx].reasons.insert(Reason::CountRule);
                }
            }
        }
    }

    let Some(usage) = usage.filter(|_| gate.fire) else {
        return;
    };
    let target = reclaim_target_bytes(&rules.space, &usage);
    let mut projected_free = picks
        .order
        .iter()
        .fold(usage.free_bytes, |acc, &idx| acc.saturating_add(candidates[idx].size_bytes));
    // `pool` is newest first; walk it oldest first.
    for &idx in pool.iter().rev() {
        if projected_free >= target {
            break;
        }
        if picks.contains(idx) {
            continue;
        }
        picks.add(idx);
        projected_free = projected_free.saturating_add(candidates[idx].size_bytes);
        candidates[idx].reasons.insert(Reason::SpaceReclaim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::FixedProbe;
    use crate::policy::model::Scope;
    use chrono::TimeZone;
    use std::fs;

    const NOW: i64 = 1_780_000_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        roots: ScanRoots,
        probe: FixedProbe,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = fs::canonicalize(dir.path()).unwrap();
            let roots = ScanRoots::new(root.join("backups"), root.join("old_worlds"));
            fs::create_dir_all(&roots.backup_dir).unwrap();
            fs::create_dir_all(&roots.old_worlds_dir).unwrap();
            Self {
                _dir: dir,
                roots,
                probe: FixedProbe::new(DiskUsage::from_bytes(1_000_000, 500_000)),
            }
        }

        fn backup(&self, name: &str, age_days: i64) -> PathBuf {
            let path = self.roots.backup_dir.join(name);
            fs::write(&path, vec![0_u8; 100]).unwrap();
            stamp(&path, age_days);
            path
        }

        fn world(&self, name: &str, age_days: i64, bytes: usize) -> PathBuf {
            let path = self.roots.old_worlds_dir.join(name);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("level.dat"), vec![0_u8; bytes]).unwrap();
            stamp(&path, age_days);
            path
        }

        fn run(&self, rules: &Rules, mode: EvalMode, selected: &[PathBuf], apply: bool) -> Evaluation {
            let inputs = EvalInputs {
                roots: &self.roots,
                probe: &self.probe,
                active_world: None,
            };
            evaluate(
                &inputs,
                &EvalRequest {
                    rules,
                    gate: GateState::default(),
                    mode,
                    selected,
                    apply,
                    now: now(),
                },
            )
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().timestamp_opt(NOW, 0).unwrap()
    }

    fn stamp(path: &Path, age_days: i64) {
        let t = filetime::FileTime::from_unix_time(NOW - age_days * 86_400 - 60, 0);
        filetime::set_file_mtime(path, t).unwrap();
    }

    fn backup_rules() -> Rules {
        let mut rules = Rules::for_scope(Scope::Backups);
        rules.caps.max_absolute = 500;
        rules.caps.max_percent_eligible = 100;
        rules
    }

    fn names(result: &EvaluationResult) -> Vec<String> {
        result
            .delete_set()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn newest_guard_overrides_rules() {
        let f = Fixture::new();
        f.backup("a.zip", 30);
        f.backup("b.zip", 20);
        let mut rules = backup_rules();
        rules.count.enabled = false;
        rules.space.enabled = false;
        rules.age.days = 1;

        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["a.zip"]);
        let newest = eval.result.items.iter().find(|i| i.name == "b.zip").unwrap();
        assert!(!newest.eligible);
        assert!(newest.reasons.contains(&Reason::HardGuard));
    }

    #[test]
    fn backups_need_every_enabled_rule() {
        let f = Fixture::new();
        for (i, age) in [40, 30, 20, 2, 1].iter().enumerate() {
            f.backup(&format!("w_manual_{i}.zip"), *age);
        }
        let mut rules = backup_rules();
        rules.space.enabled = false;
        rules.age.days = 10;
        rules.count.manual_keep = 4;
        rules.guards.newest_n_protected = 0;
        rules.guards.protect_last_backup = false;

        // Age matches three, count only the oldest one.
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["w_manual_0.zip"]);
        let item = eval.result.items.iter().find(|i| i.name == "w_manual_0.zip").unwrap();
        assert_eq!(item.reasons, vec![Reason::AgeRule, Reason::CountRule]);
    }

    #[test]
    fn closed_space_gate_vetoes_backups() {
        let f = Fixture::new();
        f.backup("old.zip", 50);
        f.backup("new.zip", 0);
        let mut rules = backup_rules();
        rules.age.days = 7;
        rules.count.enabled = false;
        // Probe reports 50% used, below the 80% trigger.
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert!(eval.result.delete_set().is_empty());

        f.probe.set_used_pct(85.0);
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["old.zip"]);
        assert!(!eval.gate.armed);
    }

    #[test]
    fn disabled_rule_set_selects_nothing() {
        let f = Fixture::new();
        f.backup("a.zip", 90);
        f.backup("b.zip", 80);
        let mut rules = backup_rules();
        rules.enabled = false;
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(eval.result.requested_delete_count, 0);
    }

    #[test]
    fn stale_worlds_use_or_semantics_and_space_fill() {
        let f = Fixture::new();
        f.world("w1", 40, 10);
        f.world("w2", 3, 10);
        f.world("w3", 2, 400_000);
        f.world("w4", 1, 10);
        let mut rules = Rules::for_scope(Scope::StaleWorlds);
        rules.caps.max_absolute = 500;
        rules.caps.max_percent_eligible = 100;
        rules.guards.protect_last_backup = false;
        rules.age.days = 30;
        rules.count.enabled = false;
        rules.space.enabled = false;

        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["w1"]);

        // 85% used: free 150_000 of 1_000_000, target 20% = 200_000.
        // w1 is already selected (+10); the oldest remaining w2 adds 10, then w3.
        rules.space.enabled = true;
        f.probe.set_used_pct(85.0);
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["w1", "w2", "w3"]);
        let w3 = eval.result.items.iter().find(|i| i.name == "w3").unwrap();
        assert_eq!(w3.reasons, vec![Reason::SpaceReclaim]);
    }

    #[test]
    fn world_count_rule_ranks_per_category() {
        let f = Fixture::new();
        for (i, age) in [5, 4, 3, 2, 1].iter().enumerate() {
            f.world(&format!("w{i}"), *age, 1);
        }
        let mut rules = Rules::for_scope(Scope::StaleWorlds);
        rules.caps.max_absolute = 500;
        rules.caps.max_percent_eligible = 100;
        rules.age.enabled = false;
        rules.space.enabled = false;
        rules.count.max_per_category = 3;
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(names(&eval.result), ["w0", "w1"]);
    }

    #[test]
    fn cap_bounds_delete_set_to_oldest() {
        let f = Fixture::new();
        for i in 0..10 {
            f.backup(&format!("b{i}.zip"), 100 - i);
        }
        let mut rules = Rules::for_scope(Scope::Backups);
        rules.count.enabled = false;
        rules.space.enabled = false;
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        // 9 eligible after the guard: cap = max(1, floor(0.9)) = 1.
        assert_eq!(eval.result.eligible_count, 9);
        assert_eq!(eval.result.requested_delete_count, 9);
        assert_eq!(eval.result.capped_delete_count, 1);
        assert_eq!(names(&eval.result), ["b0.zip"]);
    }

    #[test]
    fn manual_rejects_whole_selection_on_any_ineligible() {
        let f = Fixture::new();
        let old = f.backup("old.zip", 10);
        let newest = f.backup("newest.zip", 0);
        let rules = backup_rules();

        let eval = f.run(&rules, EvalMode::Manual, &[old.clone(), newest.clone()], true);
        assert_eq!(eval.result.selected_ineligible, vec![newest.clone()]);
        assert_eq!(eval.result.deleted_count, 0);
        assert!(old.exists());

        let unknown = f.roots.backup_dir.join("nope.zip");
        let eval = f.run(&rules, EvalMode::Manual, &[old.clone(), unknown.clone()], true);
        assert_eq!(eval.result.selected_ineligible, vec![unknown]);
        assert!(old.exists());

        let eval = f.run(&rules, EvalMode::Manual, &[old.clone()], true);
        assert_eq!(eval.result.deleted_count, 1);
        assert_eq!(eval.result.result_label(), "ok");
        assert!(!old.exists());
        assert!(newest.exists());
    }

    #[test]
    fn dry_run_leaves_disk_alone() {
        let f = Fixture::new();
        let old = f.backup("old.zip", 30);
        f.backup("new.zip", 0);
        let mut rules = backup_rules();
        rules.count.enabled = false;
        rules.space.enabled = false;
        let eval = f.run(&rules, EvalMode::Rule, &[], false);
        assert_eq!(eval.result.deleted_count, 1);
        assert_eq!(eval.result.deleted_bytes, 100);
        assert_eq!(eval.result.result_label(), "dry_run");
        assert!(old.exists());
    }
}
