//! Daemon subsystem: the background scheduler and signal handling.

pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;

pub use scheduler::{Scheduler, TickReport};
