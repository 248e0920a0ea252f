//! Retention engine: owns the scan roots and collaborators, and serializes
//! destructive runs behind a process-wide single-flight permit.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset};

use crate::engine::evaluate::{EvalInputs, EvalRequest, Evaluation, EvaluationResult, evaluate};
use crate::engine::space_gate::GateState;
use crate::platform::pal::{ActiveWorldResolver, DiskProbe, iso_seconds};
use crate::policy::model::{EvalMode, Meta, Rules};
use crate::scanner::candidates::ScanRoots;

/// Held while a destructive run is in flight. Dropping it releases the slot.
#[derive(Debug)]
pub struct RunPermit<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct RetentionEngine {
    roots: ScanRoots,
    probe: Arc<dyn DiskProbe>,
    world: Arc<dyn ActiveWorldResolver>,
    running: AtomicBool,
}

impl RetentionEngine {
    #[must_use]
    pub fn new(
        roots: ScanRoots,
        probe: Arc<dyn DiskProbe>,
        world: Arc<dyn ActiveWorldResolver>,
    ) -> Self {
        Self {
            roots,
            probe,
            world,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn roots(&self) -> &ScanRoots {
        &self.roots
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.roots.backup_dir
    }

    /// True while some caller holds the run permit.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the single-flight slot without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<RunPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: &self.running,
            })
    }

    /// Evaluate without taking the permit. Gate state is read from `meta`
    /// and returned, never written. Destructive callers go through
    /// [`Self::run_with_lock`].
    #[must_use]
    pub fn evaluate(
        &self,
        rules: &Rules,
        meta: &Meta,
        mode: EvalMode,
        selected: &[PathBuf],
        apply: bool,
        now: DateTime<FixedOffset>,
    ) -> Evaluation {
        let active_world = if rules.guards.protect_active_world {
            self.world.active_world_path()
        } else {
            None
        };
        let inputs = EvalInputs {
            roots: &self.roots,
            probe: self.probe.as_ref(),
            active_world: active_world.as_deref(),
        };
        evaluate(
            &inputs,
            &EvalRequest {
                rules,
                gate: GateState::from_meta(meta),
                mode,
                selected,
                apply,
                now,
            },
        )
    }

    /// Dry-run evaluation.
    #[must_use]
    pub fn preview(
        &self,
        rules: &Rules,
        meta: &Meta,
        mode: EvalMode,
        selected: &[PathBuf],
        now: DateTime<FixedOffset>,
    ) -> EvaluationResult {
        self.evaluate(rules, meta, mode, selected, false, now).result
    }

    /// Apply under the single-flight permit, then record the outcome and the
    /// new space-gate state in `meta`. `None` when another run holds the
    /// permit; nothing is scanned or deleted in that case.
    pub fn run_with_lock(
        &self,
        rules: &Rules,
        meta: &mut Meta,
        mode: EvalMode,
        trigger: &str,
        selected: &[PathBuf],
        now: DateTime<FixedOffset>,
    ) -> Option<EvaluationResult> {
        let _permit = self.try_acquire()?;
        let Evaluation { result, gate } = self.evaluate(rules, meta, mode, selected, true, now);
        gate.commit(meta);
        meta.last_run_at = iso_seconds(&now);
        meta.last_run_trigger = trigger.to_string();
        meta.last_run_result = result.result_label().to_string();
        meta.last_run_deleted = result.deleted_count as u64;
        meta.last_run_errors = result.errors.len() as u64;
        Some(result)
    }
}
