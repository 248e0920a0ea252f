//! WRT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RetentionError>;

/// Top-level error type for the retention engine.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("[WRT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WRT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WRT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WRT-2001] disk usage probe failure for {path}: {details}")]
    DiskProbe { path: PathBuf, details: String },

    #[error("[WRT-2003] safety veto for {path}: {reason}")]
    SafetyVeto { path: PathBuf, reason: String },

    #[error("[WRT-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WRT-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[WRT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WRT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RetentionError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WRT-1001",
            Self::MissingConfig { .. } => "WRT-1002",
            Self::ConfigParse { .. } => "WRT-1003",
            Self::DiskProbe { .. } => "WRT-2001",
            Self::SafetyVeto { .. } => "WRT-2003",
            Self::Serialization { .. } => "WRT-2101",
            Self::PermissionDenied { .. } => "WRT-3001",
            Self::Io { .. } => "WRT-3002",
            Self::Runtime { .. } => "WRT-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::DiskProbe { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for RetentionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RetentionError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
