//! Signal handling for repeated passes: SIGTERM/SIGINT stop the agent between
//! steps, SIGHUP reloads the configuration before the next pass, and SIGUSR1
//! starts the next pass immediately.
//!
//! Handlers only set flags; the pass loop polls them.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Poll granularity while idling between passes.
const IDLE_TICK: Duration = Duration::from_millis(200);

// ──────────────────── signal handler ────────────────────

/// Signal flags shared between the OS handlers and the pass loop.
///
/// All flags use `Ordering::Relaxed`; they are polled and carry no data.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    run_now_flag: Arc<AtomicBool>,
}

/// Why [`SignalHandler::idle`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    RunNow,
    Reload,
    Shutdown,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are reported on stderr.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// A handler with no OS hooks; flags move only through the `request_*` calls.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            run_now_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether a config reload has been requested.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether an immediate pass has been requested.
    pub fn should_run_now(&self) -> bool {
        self.run_now_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_run_now(&self) {
        self.run_now_flag.store(true, Ordering::Relaxed);
    }

    /// The shutdown flag, for [`super::BackupAgent::with_stop_flag`].
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Sleep up to `period`, waking early for any signal.
    ///
    /// Shutdown wins over reload, and reload over run-now.
    pub fn idle(&self, period: Duration) -> Wake {
        let deadline = Instant::now() + period;
        loop {
            if self.should_shutdown() {
                return Wake::Shutdown;
            }
            if self.should_reload() {
                return Wake::Reload;
            }
            if self.should_run_now() {
                return Wake::RunNow;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            std::thread::sleep(IDLE_TICK.min(deadline - now));
        }
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[TMR-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[TMR-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[TMR-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.run_now_flag)) {
                eprintln!("[TMR-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── tests ────────────────────
