//! Plaintext audit logging for policy actions.

pub mod audit;

pub use audit::{AuditEntry, AuditLog};
