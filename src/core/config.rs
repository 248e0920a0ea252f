//! Engine settings: TOML file + env var overrides + smart defaults.
//!
//! These are operator settings (where artifacts live, scheduler cadence,
//! pinned guard floors). Retention policy documents are separate JSON files
//! managed by [`crate::store::PolicyStore`].

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RetentionError};
use crate::core::paths::strip_trailing_separator;

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub world: WorldConfig,
    pub scheduler: SchedulerConfig,
    pub guards: GuardsConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Directory holding `*.zip` backup archives.
    pub backup_dir: PathBuf,
    /// Directory holding archived world directories and world zips.
    pub old_worlds_dir: PathBuf,
    /// Directory holding policy, history, and missed-run JSON files.
    pub data_dir: PathBuf,
    /// Plaintext audit log. Defaults to `<data_dir>/cleanup.log`.
    pub audit_log: Option<PathBuf>,
}

/// How the live world directory is located.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorldConfig {
    /// `server.properties` files checked in order for `level-name`.
    pub server_properties: Vec<PathBuf>,
    /// Used when no properties file yields a world.
    pub world_dir: Option<PathBuf>,
}

/// Background scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// A tick arriving later than this after the previous one is a missed run.
    pub gap_threshold_secs: u64,
    /// A time schedule never fires twice within this window.
    pub refire_suppression_secs: u64,
    /// Wall clock offset for time schedules. `None` uses the host's local offset.
    pub utc_offset_minutes: Option<i32>,
}

/// Operator-pinned guard floors. Policy documents can tighten but never loosen these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GuardsConfig {
    pub newest_n_protected: u32,
    pub protect_last_backup: bool,
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[WRT-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let server = home.join("minecraft");
        Self {
            config_file: home.join(".config").join("wret").join("config.toml"),
            backup_dir: server.join("backups"),
            old_worlds_dir: server.join("old_worlds"),
            data_dir: home.join(".local").join("share").join("wret"),
            audit_log: None,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            server_properties: vec![home_dir().join("minecraft").join("server.properties")],
            world_dir: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            gap_threshold_secs: 75,
            refire_suppression_secs: 60,
            utc_offset_minutes: None,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn policy_file(&self) -> PathBuf {
        self.data_dir.join("cleanup.json")
    }

    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("cleanup_history.json")
    }

    #[must_use]
    pub fn missed_runs_file(&self) -> PathBuf {
        self.data_dir.join("cleanup_missed_runs.json")
    }

    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cleanup.log"))
    }
}

impl EngineConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| RetentionError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(RetentionError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // paths
        if let Some(raw) = lookup("WRT_PATHS_BACKUP_DIR") {
            self.paths.backup_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WRT_PATHS_OLD_WORLDS_DIR") {
            self.paths.old_worlds_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WRT_PATHS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("WRT_PATHS_AUDIT_LOG") {
            self.paths.audit_log = Some(PathBuf::from(raw));
        }

        // world
        if let Some(raw) = lookup("WRT_WORLD_DIR") {
            self.world.world_dir = Some(PathBuf::from(raw));
        }

        // scheduler
        if let Some(raw) = lookup("WRT_SCHEDULER_TICK_INTERVAL_SECS") {
            self.scheduler.tick_interval_secs =
                parse_env("WRT_SCHEDULER_TICK_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("WRT_SCHEDULER_GAP_THRESHOLD_SECS") {
            self.scheduler.gap_threshold_secs =
                parse_env("WRT_SCHEDULER_GAP_THRESHOLD_SECS", &raw)?;
        }
        if let Some(raw) = lookup("WRT_SCHEDULER_REFIRE_SUPPRESSION_SECS") {
            self.scheduler.refire_suppression_secs =
                parse_env("WRT_SCHEDULER_REFIRE_SUPPRESSION_SECS", &raw)?;
        }
        if let Some(raw) = lookup("WRT_SCHEDULER_UTC_OFFSET_MINUTES") {
            self.scheduler.utc_offset_minutes =
                Some(parse_env("WRT_SCHEDULER_UTC_OFFSET_MINUTES", &raw)?);
        }

        // guards
        if let Some(raw) = lookup("WRT_GUARDS_NEWEST_N_PROTECTED") {
            self.guards.newest_n_protected = parse_env("WRT_GUARDS_NEWEST_N_PROTECTED", &raw)?;
        }
        if let Some(raw) = lookup("WRT_GUARDS_PROTECT_LAST_BACKUP") {
            self.guards.protect_last_backup = parse_env("WRT_GUARDS_PROTECT_LAST_BACKUP", &raw)?;
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        self.paths.backup_dir = strip_trailing_separator(&self.paths.backup_dir);
        self.paths.old_worlds_dir = strip_trailing_separator(&self.paths.old_worlds_dir);
        self.paths.data_dir = strip_trailing_separator(&self.paths.data_dir);
        if let Some(dir) = self.world.world_dir.as_mut() {
            *dir = strip_trailing_separator(dir);
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("paths.backup_dir", &self.paths.backup_dir),
            ("paths.old_worlds_dir", &self.paths.old_worlds_dir),
            ("paths.data_dir", &self.paths.data_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(RetentionError::InvalidConfig {
                    details: format!("{name} must not be empty"),
                });
            }
        }

        if self.paths.backup_dir == self.paths.old_worlds_dir {
            return Err(RetentionError::InvalidConfig {
                details: "paths.backup_dir and paths.old_worlds_dir must differ".to_string(),
            });
        }

        let sched = &self.scheduler;
        if !(1..=3_600).contains(&sched.tick_interval_secs) {
            return Err(RetentionError::InvalidConfig {
                details: format!(
                    "scheduler.tick_interval_secs must be in [1, 3600], got {}",
                    sched.tick_interval_secs
                ),
            });
        }
        if sched.gap_threshold_secs <= sched.tick_interval_secs {
            return Err(RetentionError::InvalidConfig {
                details: "scheduler.gap_threshold_secs must be > tick_interval_secs".to_string(),
            });
        }
        if sched.refire_suppression_secs == 0 {
            return Err(RetentionError::InvalidConfig {
                details: "scheduler.refire_suppression_secs must be >= 1".to_string(),
            });
        }
        if let Some(offset) = sched.utc_offset_minutes
            && !(-1_439..=1_439).contains(&offset)
        {
            return Err(RetentionError::InvalidConfig {
                details: format!(
                    "scheduler.utc_offset_minutes must be within +/-1439, got {offset}"
                ),
            });
        }

        if self.guards.newest_n_protected > 1_000 {
            return Err(RetentionError::InvalidConfig {
                details: format!(
                    "guards.newest_n_protected must be <= 1000, got {}",
                    self.guards.newest_n_protected
                ),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| RetentionError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
