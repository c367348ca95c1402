//! Counters for the allocator's packing and dispatch activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared between the packing loop, the dispatcher
/// loops, and external removal calls.
///
/// All counters use `Relaxed` ordering: they are purely statistical, no
/// control flow depends on them, and slightly stale reads are acceptable
/// for observability.
#[derive(Debug, Default)]
pub struct AllocatorMetrics {
    repack_passes: AtomicU64,
    containers_packed: AtomicU64,
    containers_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    containers_removed: AtomicU64,
    containers_requeued: AtomicU64,
}

impl AllocatorMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total packing passes run.
    pub fn repack_passes(&self) -> u64 {
        self.repack_passes.load(Ordering::Relaxed)
    }

    /// Total containers newly placed into bins.
    pub fn containers_packed(&self) -> u64 {
        self.containers_packed.load(Ordering::Relaxed)
    }

    /// Total start-RPCs acknowledged by workers.
    pub fn containers_dispatched(&self) -> u64 {
        self.containers_dispatched.load(Ordering::Relaxed)
    }

    /// Total dispatch attempts that failed.
    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    /// Total containers removed after termination.
    pub fn containers_removed(&self) -> u64 {
        self.containers_removed.load(Ordering::Relaxed)
    }

    /// Total containers pushed back to the queue by worker failures.
    pub fn containers_requeued(&self) -> u64 {
        self.containers_requeued.load(Ordering::Relaxed)
    }

    pub(crate) fn record_repack(&self, newly_packed: u64) {
        self.repack_passes.fetch_add(1, Ordering::Relaxed);
        self.containers_packed.fetch_add(newly_packed, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.containers_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removal(&self) {
        self.containers_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued(&self, count: u64) {
        self.containers_requeued.fetch_add(count, Ordering::Relaxed);
    }
}
