//! Graceful-termination signal shared by every background loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable signal the packing, dispatcher, profiler, and predictor loops
/// check between sleeps.
///
/// Triggering is idempotent: the first call takes effect, later calls are
/// no-ops. The core has no finer-grained cancellation surface; loops finish
/// their current iteration and exit.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Creates a signal in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown and wakes every waiting loop.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::Release) {
            self.notify.notify_waiters();
        }
    }

    /// Returns `true` once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Completes when shutdown is requested; immediately if it already was.
    pub async fn triggered(&self) {
        loop {
            // Register interest before re-checking the flag so a trigger
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
