//! Cancellable bounded waits.
//!
//! Long waits (reboot countdown, connectivity) poll a condition until it is
//! met, a timeout passes, or the operator interrupts. The interrupt is a
//! shared flag set by the SIGINT handler and checked on every tick, so a
//! wait never blocks past the next tick after Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity at which the cancel flag is checked.
const TICK: Duration = Duration::from_millis(100);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a handled interrupt so the next one is seen fresh.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// The underlying flag, for registration with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Poll `check` every `interval` until it yields a value, `timeout` elapses,
/// or `cancel` is raised. `progress` receives the remaining time once per
/// interval, before each check.
pub fn poll<T>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
    mut check: impl FnMut() -> Option<T>,
    mut progress: impl FnMut(Duration),
) -> WaitOutcome<T> {
    let start = Instant::now();
    let interval = interval.max(TICK);
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        let elapsed = start.elapsed();
        progress(timeout.saturating_sub(elapsed));
        if let Some(value) = check() {
            return WaitOutcome::Ready(value);
        }
        if elapsed >= timeout {
            return WaitOutcome::TimedOut;
        }

        let next = (elapsed + interval).min(timeout);
        while start.elapsed() < next {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            std::thread::sleep(TICK.min(next.saturating_sub(start.elapsed())));
        }
    }
}

/// Count down `duration`, reporting whole seconds left. Returns `false` when
/// cancelled before reaching zero.
pub fn countdown(duration: Duration, cancel: &CancelToken, mut tick: impl FnMut(u64)) -> bool {
    let outcome: WaitOutcome<()> = poll(
        duration,
        Duration::from_secs(1),
        cancel,
        || None,
        |remaining| tick(remaining.as_secs_f64().ceil() as u64),
    );
    !matches!(outcome, WaitOutcome::Cancelled)
}
