#![forbid(unsafe_code)]

//! World Retention (wret): a guarded retention engine for backup archives and
//! archived world snapshots.
//!
//! Two independent policy scopes share one engine:
//! 1. **backups**: `*.zip` archives in the backup directory, selected only
//!    when every enabled rule agrees
//! 2. **stale_worlds**: archived world directories and world zips, selected
//!    by age or count, topped up by space reclaim
//!
//! Every evaluation is bounded by hard guards (newest artifacts, the live
//! world) and a blast-radius cap; destructive runs are single-flight.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use world_retention::prelude::*;
//!
//! let config = EngineConfig::load(None)?;
//! let service = RetentionService::from_config(&config);
//! let preview = service.preview(Scope::Backups)?;
//! println!("{} would be deleted", preview.capped_delete_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod engine;
pub mod logger;
pub mod platform;
pub mod policy;
pub mod scanner;
pub mod store;
