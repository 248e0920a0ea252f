//! Candidate scanning: artifact discovery and backup provenance buckets.

pub mod buckets;
pub mod candidates;

pub use buckets::BackupBucket;
pub use candidates::{Candidate, Reason, ScanRoots, scan};
