//! Candidate discovery under the backup and old-worlds roots.
//!
//! Every artifact found is returned, eligible or not, so callers can render a
//! complete audit view. Per-item stat and resolve failures mark that item
//! ineligible; they never abort the scan.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::paths::{is_within, paths_overlap, resolve_absolute_path};
use crate::policy::model::{Category, CategoryToggles};

/// Why a candidate is ineligible or why it was selected.
///
/// Variants are ordered scan findings first, then evaluation outcomes, which
/// is also the order they are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    StatFailed,
    ResolveFailed,
    SymlinkBlocked,
    OutsideAllowedRoots,
    ActiveWorldProtected,
    CategoryDisabled,
    HardGuard,
    AgeRule,
    CountRule,
    SpaceReclaim,
    ManualSelection,
    IneligibleSelection,
}

impl Reason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatFailed => "stat_failed",
            Self::ResolveFailed => "resolve_failed",
            Self::SymlinkBlocked => "symlink_blocked",
            Self::OutsideAllowedRoots => "outside_allowed_roots",
            Self::ActiveWorldProtected => "active_world_protected",
            Self::CategoryDisabled => "category_disabled",
            Self::HardGuard => "hard_guard",
            Self::AgeRule => "age_rule",
            Self::CountRule => "count_rule",
            Self::SpaceReclaim => "space_reclaim",
            Self::ManualSelection => "manual_selection",
            Self::IneligibleSelection => "ineligible_selection",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One on-disk artifact considered for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub category: Category,
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub eligible: bool,
    pub reasons: BTreeSet<Reason>,
}

impl Candidate {
    /// Mark ineligible with `reason`.
    pub fn block(&mut self, reason: Reason) {
        self.eligible = false;
        self.reasons.insert(reason);
    }
}

/// The two directories candidates are discovered under. Nothing outside
/// them is ever eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRoots {
    pub backup_dir: PathBuf,
    pub old_worlds_dir: PathBuf,
}

impl ScanRoots {
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>, old_worlds_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            old_worlds_dir: old_worlds_dir.into(),
        }
    }
}

struct Inspector<'a> {
    allowed_roots: [PathBuf; 2],
    active_world: Option<&'a Path>,
    categories: &'a CategoryToggles,
}

impl Inspector<'_> {
    fn inspect(&self, path: PathBuf, category: Category, is_dir: bool) -> Candidate {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut candidate = Candidate {
            category,
            path,
            name,
            is_dir,
            size_bytes: 0,
            mtime: DateTime::<Utc>::UNIX_EPOCH,
            eligible: true,
            reasons: BTreeSet::new(),
        };

        match fs::metadata(&candidate.path) {
            Ok(meta) => {
                candidate.size_bytes = if is_dir {
                    dir_size(&candidate.path)
                } else {
                    meta.len()
                };
                if let Ok(modified) = meta.modified() {
                    candidate.mtime = DateTime::<Utc>::from(modified);
                }
            }
            Err(_) => candidate.block(Reason::StatFailed),
        }

        if fs::symlink_metadata(&candidate.path).is_ok_and(|m| m.file_type().is_symlink()) {
            candidate.block(Reason::SymlinkBlocked);
        }

        match fs::canonicalize(&candidate.path) {
            Ok(resolved) => {
                if !self.allowed_roots.iter().any(|root| is_within(&resolved, root)) {
                    candidate.block(Reason::OutsideAllowedRoots);
                }
                if self
                    .active_world
                    .is_some_and(|world| paths_overlap(&resolved, world))
                {
                    candidate.block(Reason::ActiveWorldProtected);
                }
            }
            Err(_) => candidate.block(Reason::ResolveFailed),
        }

        if !self.categories.enabled(category) {
            candidate.block(Reason::CategoryDisabled);
        }
        candidate
    }
}

/// Enumerate every artifact under both roots, newest first.
///
/// - `*.zip` directly in the backup root: `backup_zip`
/// - directories directly in the old-worlds root: `stale_world_dir`
/// - `*.zip` anywhere under the old-worlds root: `old_world_zip`
#[must_use]
pub fn scan(
    roots: &ScanRoots,
    categories: &CategoryToggles,
    active_world: Option<&Path>,
) -> Vec<Candidate> {
    let backup_root = resolve_absolute_path(&roots.backup_dir);
    let worlds_root = resolve_absolute_path(&roots.old_worlds_dir);
    let inspector = Inspector {
        allowed_roots: [backup_root.clone(), worlds_root.clone()],
        active_world,
        categories,
    };
    let mut candidates = Vec::new();

    if backup_root.is_dir() {
        for path in list_dir(&backup_root) {
            if !has_zip_extension(&path)
                || fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir())
            {
                continue;
            }
            candidates.push(inspector.inspect(path, Category::BackupZip, false));
        }
    }

    if worlds_root.is_dir() {
        for path in list_dir(&worlds_root) {
            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    candidates.push(inspector.inspect(path, Category::StaleWorldDir, true));
                }
                Ok(meta) if meta.is_file() && has_zip_extension(&path) => {
                    candidates.push(inspector.inspect(path, Category::OldWorldZip, false));
                }
                _ => {}
            }
        }
        for path in nested_zips(&worlds_root) {
            candidates.push(inspector.inspect(path, Category::OldWorldZip, false));
        }
    }

    candidates.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.path.cmp(&b.path)));
    candidates
}

fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(err) => {
            eprintln!("[WRT-SCAN] cannot list {}: {err}", dir.display());
            Vec::new()
        }
    }
}

/// Zip files below the first level of `root`. Symlinked directories are not
/// descended into.
fn nested_zips(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack: Vec<PathBuf> = Vec::new();
    for path in list_dir(root) {
        if fs::symlink_metadata(&path).is_ok_and(|m| m.is_dir()) {
            stack.push(path);
        }
    }
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if has_zip_extension(&path) {
                found.push(path);
            }
        }
    }
    found
}

/// Recursive size of regular files under `dir`, without following symlinks.
/// Unreadable entries are skipped.
#[must_use]
pub fn dir_size(dir: &Path) -> u64 {
    let mut total = 0_u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total = total.saturating_add(meta.len());
            }
        }
    }
    total
}
