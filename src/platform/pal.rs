//! Platform abstraction: disk-usage probe, clock, and active-world resolution.
//!
//! The engine never reaches for the OS directly; it consumes these traits so
//! tests can pin time, fake disk pressure, and choose which world is live.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RetentionError};

// ──────────────────── disk usage ────────────────────

/// Usage snapshot of the filesystem holding a path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DiskUsage {
    pub used_pct: f64,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    /// Build a snapshot from raw byte counts. `free_bytes` is space available
    /// to unprivileged writers.
    #[must_use]
    pub fn from_bytes(total_bytes: u64, free_bytes: u64) -> Self {
        let used_pct = if total_bytes == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                (total_bytes.saturating_sub(free_bytes) as f64 * 100.0) / total_bytes as f64
            }
        };
        Self {
            used_pct,
            total_bytes,
            free_bytes,
        }
    }
}

/// Disk-usage collaborator.
pub trait DiskProbe: Send + Sync {
    fn usage(&self, path: &Path) -> Result<DiskUsage>;
}

/// `statvfs`-backed probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    #[cfg(unix)]
    fn usage(&self, path: &Path) -> Result<DiskUsage> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| RetentionError::DiskProbe {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = stat.fragment_size();
        let total = stat.blocks().saturating_mul(fragment);
        let available = stat.blocks_available().saturating_mul(fragment);
        if total == 0 {
            return Err(RetentionError::DiskProbe {
                path: path.to_path_buf(),
                details: "filesystem reports zero capacity".to_string(),
            });
        }
        Ok(DiskUsage::from_bytes(total, available))
    }

    #[cfg(not(unix))]
    fn usage(&self, path: &Path) -> Result<DiskUsage> {
        Err(RetentionError::DiskProbe {
            path: path.to_path_buf(),
            details: "statvfs is only available on unix".to_string(),
        })
    }
}

/// Probe returning a settable snapshot, for deterministic tests and drills.
#[derive(Debug)]
pub struct FixedProbe {
    usage: RwLock<Option<DiskUsage>>,
}

impl FixedProbe {
    #[must_use]
    pub fn new(usage: DiskUsage) -> Self {
        Self {
            usage: RwLock::new(Some(usage)),
        }
    }

    /// A probe whose every call fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            usage: RwLock::new(None),
        }
    }

    /// Replace the snapshot, keeping total/free bytes consistent with `used_pct`.
    pub fn set_used_pct(&self, used_pct: f64) {
        let mut guard = self.usage.write();
        let total = guard.map_or(100 * (1 << 30), |u| u.total_bytes);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let free = (total as f64 * (100.0 - used_pct).clamp(0.0, 100.0) / 100.0).round() as u64;
        *guard = Some(DiskUsage {
            used_pct,
            total_bytes: total,
            free_bytes: free,
        });
    }

    pub fn set(&self, usage: DiskUsage) {
        *self.usage.write() = Some(usage);
    }
}

impl DiskProbe for FixedProbe {
    fn usage(&self, path: &Path) -> Result<DiskUsage> {
        (*self.usage.read()).ok_or_else(|| RetentionError::DiskProbe {
            path: path.to_path_buf(),
            details: "probe unavailable".to_string(),
        })
    }
}

// ──────────────────── clock ────────────────────

/// Wall-clock collaborator. Time schedules match against this offset.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// ISO-8601 stamp with seconds precision, as written to every persisted log.
#[must_use]
pub fn iso_seconds(at: &DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

/// Real clock, optionally pinned to a fixed UTC offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    /// Build from an offset in minutes; `None` (or an out-of-range value) uses host local time.
    #[must_use]
    pub fn new(utc_offset_minutes: Option<i32>) -> Self {
        Self {
            offset: utc_offset_minutes.and_then(|m| FixedOffset::east_opt(m.saturating_mul(60))),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<FixedOffset>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.write();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.read()
    }
}

// ──────────────────── active world ────────────────────

/// Resolves the directory of the world the server is currently running.
pub trait ActiveWorldResolver: Send + Sync {
    fn active_world_path(&self) -> Option<PathBuf>;
}

/// Reads `level-name` from the first usable `server.properties` candidate.
#[derive(Debug, Clone, Default)]
pub struct ServerPropertiesResolver {
    candidates: Vec<PathBuf>,
    fallback: Option<PathBuf>,
}

impl ServerPropertiesResolver {
    #[must_use]
    pub fn new(candidates: Vec<PathBuf>, fallback: Option<PathBuf>) -> Self {
        Self {
            candidates,
            fallback,
        }
    }
}

impl ActiveWorldResolver for ServerPropertiesResolver {
    fn active_world_path(&self) -> Option<PathBuf> {
        for candidate in &self.candidates {
            let Ok(raw) = fs::read(candidate) else {
                continue;
            };
            let text = String::from_utf8_lossy(&raw);
            let Some(level_name) = read_level_name(&text) else {
                continue;
            };
            let mut path = PathBuf::from(level_name);
            if !path.is_absolute() {
                let parent = candidate.parent().unwrap_or_else(|| Path::new("."));
                path = parent.join(path);
            }
            return Some(crate::core::paths::resolve_absolute_path(&path));
        }
        self.fallback
            .as_deref()
            .map(crate::core::paths::resolve_absolute_path)
    }
}

/// Fixed answer; `None` means no world is live.
#[derive(Debug, Clone, Default)]
pub struct FixedWorld(pub Option<PathBuf>);

impl ActiveWorldResolver for FixedWorld {
    fn active_world_path(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Extract a non-empty `level-name` value from `server.properties` text.
fn read_level_name(text: &str) -> Option<String> {
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "level-name" {
            let value = value.trim();
            return (!value.is_empty()).then(|| value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn usage_from_bytes_computes_used_pct() {
        let usage = DiskUsage::from_bytes(1_000, 250);
        assert!((usage.used_pct - 75.0).abs() < f64::EPSILON);
        assert_eq!(DiskUsage::from_bytes(0, 0).used_pct, 0.0);
    }

    #[test]
    fn fixed_probe_tracks_updates() {
        let probe = FixedProbe::new(DiskUsage::from_bytes(1_000, 500));
        probe.set_used_pct(82.0);
        let usage = probe.usage(Path::new("/srv")).expect("usage");
        assert!((usage.used_pct - 82.0).abs() < f64::EPSILON);
        assert_eq!(usage.total_bytes, 1_000);
        assert_eq!(usage.free_bytes, 180);
    }

    #[test]
    fn unavailable_probe_errors() {
        let err = FixedProbe::unavailable()
            .usage(Path::new("/srv"))
            .expect_err("should fail");
        assert_eq!(err.code(), "WRT-2001");
    }

    #[cfg(unix)]
    #[test]
    fn statvfs_probe_reads_tempdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let usage = StatvfsProbe.usage(dir.path()).expect("statvfs");
        assert!(usage.total_bytes > 0);
        assert!((0.0..=100.0).contains(&usage.used_pct));
    }

    #[test]
    fn manual_clock_advances() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let start = offset.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(TimeDelta::seconds(90));
        assert_eq!(clock.now(), start + TimeDelta::seconds(90));
    }

    #[test]
    fn system_clock_honours_pinned_offset() {
        let clock = SystemClock::new(Some(330));
        assert_eq!(clock.now().offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn level_name_skips_comments_and_blanks() {
        let text = "#level-name=commented\n\nmotd=hi\nlevel-name = survival \n";
        assert_eq!(read_level_name(text).as_deref(), Some("survival"));
        assert_eq!(read_level_name("level-name=\n"), None);
    }

    #[test]
    fn properties_resolver_resolves_relative_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let props = dir.path().join("server.properties");
        fs::write(&props, "level-name=world\n").expect("write");
        fs::create_dir(dir.path().join("world")).expect("mkdir");

        let resolver = ServerPropertiesResolver::new(
            vec![dir.path().join("missing.properties"), props],
            None,
        );
        let resolved = resolver.active_world_path().expect("world");
        assert_eq!(
            resolved,
            fs::canonicalize(dir.path().join("world")).expect("canon")
        );
    }

    #[test]
    fn properties_resolver_uses_fallback() {
        let resolver =
            ServerPropertiesResolver::new(Vec::new(), Some(PathBuf::from("/srv/mc/world")));
        assert_eq!(
            resolver.active_world_path(),
            Some(PathBuf::from("/srv/mc/world"))
        );
        assert_eq!(FixedWorld(None).active_world_path(), None);
    }
}
