//! Provenance buckets for backup archives.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::model::CountRule;

/// Where a backup archive came from, derived from its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupBucket {
    PreRestore,
    Auto,
    Session,
    Manual,
    Other,
}

impl BackupBucket {
    pub const ALL: [Self; 5] = [
        Self::PreRestore,
        Self::Auto,
        Self::Session,
        Self::Manual,
        Self::Other,
    ];

    /// Case-insensitive substring match; the first marker found wins in the
    /// order `_pre_restore`, `_auto`, `_session_end`, `_manual`.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        if lowered.contains("_pre_restore") {
            Self::PreRestore
        } else if lowered.contains("_auto") {
            Self::Auto
        } else if lowered.contains("_session_end") {
            Self::Session
        } else if lowered.contains("_manual") {
            Self::Manual
        } else {
            Self::Other
        }
    }

    /// Newest archives kept per bucket before the count rule matches.
    #[must_use]
    pub const fn keep_limit(self, count: &CountRule) -> u32 {
        match self {
            Self::Session => count.session_keep,
            Self::Manual => count.manual_keep,
            Self::PreRestore => count.prerestore_keep,
            Self::Auto | Self::Other => count.max_per_category,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreRestore => "pre_restore",
            Self::Auto => "auto",
            Self::Session => "session",
            Self::Manual => "manual",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for BackupBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_follows_marker_order() {
        assert_eq!(
            BackupBucket::classify("world_pre_restore_auto_2026.zip"),
            BackupBucket::PreRestore
        );
        assert_eq!(
            BackupBucket::classify("world_auto_session_end.zip"),
            BackupBucket::Auto
        );
        assert_eq!(
            BackupBucket::classify("world_session_end_manual.zip"),
            BackupBucket::Session
        );
        assert_eq!(BackupBucket::classify("World_MANUAL_1.zip"), BackupBucket::Manual);
        assert_eq!(BackupBucket::classify("world-2026-01-01.zip"), BackupBucket::Other);
    }

    #[test]
    fn keep_limits_fall_back_for_auto_and_other() {
        let count = CountRule {
            enabled: true,
            session_keep: 3,
            manual_keep: 2,
            prerestore_keep: 4,
            max_per_category: 9,
        };
        assert_eq!(BackupBucket::Session.keep_limit(&count), 3);
        assert_eq!(BackupBucket::Manual.keep_limit(&count), 2);
        assert_eq!(BackupBucket::PreRestore.keep_limit(&count), 4);
        assert_eq!(BackupBucket::Auto.keep_limit(&count), 9);
        assert_eq!(BackupBucket::Other.keep_limit(&count), 9);
    }
}
