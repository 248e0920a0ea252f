//! Policy document persistence (`cleanup.json`).
//!
//! Loads migrate forward, merge onto defaults and re-normalize; saves normalize
//! and write atomically.
//! There is no concurrency token: the last completed save wins.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::config::GuardsConfig;
use crate::core::errors::{Result, RetentionError};
use crate::policy::merge::merge_document;
use crate::policy::migrate::{self, SCHEMA_VERSION};
use crate::policy::model::PolicyDocument;
use crate::store::atomic::{JsonRead, read_json, write_json_atomic};

#[derive(Debug, Clone)]
pub struct PolicyStore {
    path: PathBuf,
    guards: GuardsConfig,
}

impl PolicyStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, guards: GuardsConfig) -> Self {
        Self {
            path: path.into(),
            guards,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn defaults(&self) -> PolicyDocument {
        let mut doc = PolicyDocument::default();
        doc.normalize(&self.guards);
        doc
    }

    /// Load the policy. A missing or unparsable document yields defaults
    /// without touching disk. A readable one is migrated and merged field by
    /// field onto defaults; if that changed anything without discarding a
    /// value, it is rewritten once so later loads are already normalized.
    pub fn load(&self) -> Result<PolicyDocument> {
        let raw = match read_json::<Value>(&self.path)? {
            JsonRead::Loaded(raw) if raw.is_object() => raw,
            JsonRead::Loaded(_) => {
                eprintln!(
                    "[WRT-STORE] policy {} is not a JSON object, using defaults",
                    self.path.display()
                );
                return Ok(self.defaults());
            }
            JsonRead::Missing => return Ok(self.defaults()),
            JsonRead::Unparsable(err) => {
                eprintln!(
                    "[WRT-STORE] policy {} unparsable, using defaults: {err}",
                    self.path.display()
                );
                return Ok(self.defaults());
            }
        };

        let migrated = migrate::migrate(raw.clone());
        if migrated.from_version < SCHEMA_VERSION {
            eprintln!(
                "[WRT-STORE] migrated policy {} from schema v{} to v{SCHEMA_VERSION}",
                self.path.display(),
                migrated.from_version
            );
        }
        let merged = merge_document(&migrated.document);
        let lossless = merged.is_lossless() && migrated.dropped_schedules == 0;
        let mut doc = merged.document;
        doc.normalize(&self.guards);

        if lossless
            && serde_json::to_value(&doc)? != raw
            && let Err(err) = write_json_atomic(&self.path, &doc)
        {
            eprintln!("[WRT-STORE] failed to persist normalized policy: {err}");
        }
        Ok(doc)
    }

    /// Normalize `doc` in place and persist it. An on-disk document that
    /// could not be read in full is first copied to [`Self::preserved_path`].
    pub fn save(&self, doc: &mut PolicyDocument) -> Result<()> {
        doc.normalize(&self.guards);
        self.preserve_unreadable()?;
        write_json_atomic(&self.path, doc)
    }

    /// Where an unreadable policy is kept before it is overwritten.
    #[must_use]
    pub fn preserved_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".unreadable");
        self.path.with_file_name(name)
    }

    fn preserve_unreadable(&self) -> Result<()> {
        let unreadable = match read_json::<Value>(&self.path)? {
            JsonRead::Missing => false,
            JsonRead::Unparsable(_) => true,
            JsonRead::Loaded(raw) if raw.is_object() => {
                let migrated = migrate::migrate(raw);
                migrated.dropped_schedules > 0 || !merge_document(&migrated.document).is_lossless()
            }
            JsonRead::Loaded(_) => true,
        };
        if !unreadable {
            return Ok(());
        }
        let preserved = self.preserved_path();
        fs::copy(&self.path, &preserved).map_err(|err| RetentionError::io(&preserved, err))?;
        eprintln!(
            "[WRT-STORE] policy {} had unreadable values, original kept at {}",
            self.path.display(),
            preserved.display()
        );
        Ok(())
    }
}
