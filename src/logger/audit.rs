//! Plaintext audit log: one pipe-delimited line per policy action.
//!
//! ```text
//! 2026-03-01T04:30:00+00:00 | what=scheduled_run | why=time | trigger=scheduled:backups:nightly | result=ok | details=deleted=2;errors=0
//! ```
//!
//! Lines are assembled in memory and appended with a single `write_all` so a
//! tailing reader never sees half a line. The file is opened per line; no
//! handle is held between writes.
//!
//! Degradation chain:
//! 1. Primary file path
//! 2. stderr with `[WRT-AUDIT]` prefix
//! 3. Silent discard (audit failures never fail a run)

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Default size before the log is rotated to `<name>.1`.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const ROTATED_FILES: u32 = 3;

/// One audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry<'a> {
    pub what: &'a str,
    pub why: &'a str,
    pub trigger: &'a str,
    pub result: &'a str,
    pub details: &'a str,
}

impl AuditEntry<'_> {
    /// Render the line, newline included. `details` is omitted when empty.
    #[must_use]
    pub fn render(&self, stamp: &str) -> String {
        let mut line = format!(
            "{stamp} | what={} | why={} | trigger={} | result={}",
            one_line(self.what),
            one_line(self.why),
            one_line(self.trigger),
            one_line(self.result),
        );
        if !self.details.is_empty() {
            line.push_str(" | details=");
            line.push_str(&one_line(self.details));
        }
        line.push('\n');
        line
    }
}

fn one_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Append-only audit writer with size rotation and fallback.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    state: Mutex<WriterState>,
}

impl AuditLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_max_bytes(path, DEFAULT_MAX_BYTES)
    }

    #[must_use]
    pub fn with_max_bytes(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            state: Mutex::new(WriterState::Normal),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match *self.state.lock() {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Append one record stamped with `stamp`.
    pub fn record(&self, stamp: &str, entry: &AuditEntry<'_>) {
        let line = entry.render(stamp);
        let mut state = self.state.lock();
        loop {
            match *state {
                WriterState::Normal => match self.append(&line) {
                    Ok(()) => return,
                    Err(err) => {
                        let _ = writeln!(
                            io::stderr(),
                            "[WRT-AUDIT] cannot write {}: {err}, using stderr",
                            self.path.display()
                        );
                        *state = WriterState::Stderr;
                    }
                },
                WriterState::Stderr => {
                    if write!(io::stderr(), "[WRT-AUDIT] {line}").is_err() {
                        *state = WriterState::Discard;
                    }
                    return;
                }
                WriterState::Discard => return,
            }
        }
    }

    /// Return to the primary path if it has become writable again.
    pub fn try_recover(&self) {
        let mut state = self.state.lock();
        if *state == WriterState::Normal {
            return;
        }
        if open_append(&self.path).is_ok() {
            *state = WriterState::Normal;
            let _ = writeln!(
                io::stderr(),
                "[WRT-AUDIT] recovered to primary path: {}",
                self.path.display()
            );
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let current = fs::metadata(&self.path).map_or(0, |m| m.len());
        if current > 0 && current + line.len() as u64 > self.max_bytes {
            self.rotate();
        }
        let mut file = open_append(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Shift `.2`→`.3`, `.1`→`.2`, current→`.1`. Failures are ignored; the
    /// next append simply continues the current file.
    fn rotate(&self) {
        for i in (1..ROTATED_FILES).rev() {
            let _ = fs::rename(rotated_name(&self.path, i), rotated_name(&self.path, i + 1));
        }
        let _ = fs::rename(&self.path, rotated_name(&self.path, 1));
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: &str = "2026-03-01T04:30:00+00:00";

    fn entry<'a>(details: &'a str) -> AuditEntry<'a> {
        AuditEntry {
            what: "save_rules",
            why: "manual_save",
            trigger: "manual",
            result: "ok",
            details,
        }
    }

    #[test]
    fn render_matches_line_format() {
        assert_eq!(
            entry("scope=backups;rule_version=2").render(STAMP),
            "2026-03-01T04:30:00+00:00 | what=save_rules | why=manual_save | trigger=manual | result=ok | details=scope=backups;rule_version=2\n"
        );
        assert_eq!(
            entry("").render(STAMP),
            "2026-03-01T04:30:00+00:00 | what=save_rules | why=manual_save | trigger=manual | result=ok\n"
        );
    }

    #[test]
    fn embedded_newlines_stay_on_one_line() {
        let line = entry("a\nb").render(STAMP);
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("details=a b"));
    }

    #[test]
    fn appends_lines_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs").join("cleanup.log"));
        log.record(STAMP, &entry("one"));
        log.record(STAMP, &entry("two"));
        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().ends_with("details=two"));
        assert_eq!(log.state(), "normal");
    }

    #[test]
    fn unwritable_path_degrades_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        // Parent is a regular file, so the open must fail.
        let log = AuditLog::new(blocker.join("cleanup.log"));
        log.record(STAMP, &entry(""));
        assert_eq!(log.state(), "stderr");

        fs::remove_file(&blocker).unwrap();
        log.try_recover();
        assert_eq!(log.state(), "normal");
        log.record(STAMP, &entry("back"));
        assert!(fs::read_to_string(log.path()).unwrap().contains("details=back"));
    }

    #[test]
    fn rotates_past_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleanup.log");
        let log = AuditLog::with_max_bytes(&path, 150);
        log.record(STAMP, &entry("first"));
        log.record(STAMP, &entry("second"));
        assert!(rotated_name(&path, 1).exists());
        let current = fs::read_to_string(&path).unwrap();
        assert!(current.contains("details=second"));
        assert!(!current.contains("details=first"));
    }
}
