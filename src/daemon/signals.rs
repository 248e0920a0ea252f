//! Signal handling: SIGTERM/SIGINT graceful shutdown and SIGUSR1 "tick now".
//!
//! Uses the `signal-hook` crate for safe signal registration. Flags are
//! bridged onto crossbeam channels so the scheduler can `select!` on them
//! alongside its tick timer.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{Result, RetentionError};

// ──────────────────── signal handler ────────────────────

/// Thread-safe signal state shared between the OS handlers and the bridge.
///
/// All flags use `Ordering::Relaxed` because the bridge polls them and exact
/// ordering with other atomics is not required.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    tick_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// A handler with no OS hooks, driven only programmatically.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            tick_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate tick has been requested.
    #[must_use]
    pub fn should_tick(&self) -> bool {
        self.tick_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_tick(&self) {
        self.tick_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WRT-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[WRT-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.tick_flag)) {
                eprintln!("[WRT-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }

    /// Spawn a thread forwarding the flags as channel messages. The shutdown
    /// receiver gets one message; the bridge then exits and both channels
    /// disconnect.
    pub fn bridge(&self, poll: Duration) -> Result<(Receiver<()>, Receiver<()>)> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (tick_tx, tick_rx) = bounded(1);
        let handler = self.clone();
        thread::Builder::new()
            .name("wret-signals".to_string())
            .spawn(move || {
                loop {
                    if handler.should_shutdown() {
                        eprintln!("[WRT-SIGNAL] shutdown requested");
                        let _ = shutdown_tx.try_send(());
                        break;
                    }
                    if handler.should_tick() {
                        let _ = tick_tx.try_send(());
                    }
                    thread::sleep(poll);
                }
            })
            .map_err(|e| RetentionError::Runtime {
                details: format!("failed to spawn signal bridge: {e}"),
            })?;
        Ok((shutdown_rx, tick_rx))
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_flag_clears_on_read() {
        let handler = SignalHandler::detached();
        assert!(!handler.should_tick());
        handler.request_tick();
        assert!(handler.should_tick());
        assert!(!handler.should_tick());
    }

    #[test]
    fn bridge_forwards_tick_then_shutdown() {
        let handler = SignalHandler::detached();
        let (shutdown, tick) = handler.bridge(Duration::from_millis(5)).unwrap();
        handler.request_tick();
        assert!(tick.recv_timeout(Duration::from_secs(2)).is_ok());
        handler.request_shutdown();
        assert!(shutdown.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
