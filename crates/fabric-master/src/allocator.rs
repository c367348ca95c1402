//! Container allocator: the authoritative bin layout, the packing loop, and
//! the dispatcher loops.
//!
//! The allocator owns the only mutable copy of the bin layout. The packing
//! loop periodically drains the container queue and runs first-fit against
//! the current layout; dispatchers pop placed containers off the allocation
//! queue and issue the start-RPC to the worker owning the container's bin.
//!
//! # Locking
//!
//! Three locks, never held across an outbound RPC:
//!
//! - the container-queue lock (inside [`ContainerQueue`]),
//! - the allocation lock guarding the allocation queue,
//! - the bin-layout lock guarding the bin list and every bin's state.
//!
//! The packing pass holds the bin-layout lock for its whole duration, so
//! dispatch lookups, profiler updates, and removals always observe a
//! complete layout. Dispatchers release the allocation lock before the RPC;
//! four of them (configurable) run concurrently because start-RPC latency
//! dominates everything else in the pipeline.

use crate::client::WorkerClientBoxed;
use crate::config::AllocatorConfig;
use crate::error::DispatchError;
use crate::metrics::AllocatorMetrics;
use crate::profiler::PlacementUpdates;
use crate::queue::ContainerQueue;
use crate::registry::LookUpTable;
use crate::shutdown::ShutdownSignal;
use fabric_core::definitions::BinStatus;
use fabric_core::{first_fit, Bin, BinSnapshot, ImageSizeUpdate, SharedContainer, ShortId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

/// Suggested worker head-room on top of the bins in use.
///
/// One spare below ten workers, then a logarithmic proportion; the result
/// never decreases as the fleet grows.
pub fn overhead_workers(active_workers: usize) -> usize {
    if active_workers < 10 {
        1
    } else if active_workers < 100 {
        (0.5 * (active_workers as f64).ln()).ceil() as usize
    } else {
        (active_workers as f64).ln().trunc() as usize
    }
}

/// Owns the bin layout and drives containers from "queued for packing" to
/// "running on a worker".
pub struct ContainerAllocator {
    container_queue: Arc<ContainerQueue>,
    registry: Arc<LookUpTable>,
    client: Arc<dyn WorkerClientBoxed>,
    config: AllocatorConfig,
    bins: Mutex<Vec<Bin>>,
    allocation_queue: Mutex<VecDeque<SharedContainer>>,
    allocation_ready: Notify,
    target_workers: AtomicUsize,
    metrics: AllocatorMetrics,
}

impl ContainerAllocator {
    /// Creates an allocator with an empty layout.
    pub fn new(
        config: AllocatorConfig,
        container_queue: Arc<ContainerQueue>,
        registry: Arc<LookUpTable>,
        client: Arc<dyn WorkerClientBoxed>,
    ) -> Self {
        Self {
            container_queue,
            registry,
            client,
            config,
            bins: Mutex::new(Vec::new()),
            allocation_queue: Mutex::new(VecDeque::new()),
            allocation_ready: Notify::new(),
            target_workers: AtomicUsize::new(0),
            metrics: AllocatorMetrics::new(),
        }
    }

    fn lock_bins(&self) -> MutexGuard<'_, Vec<Bin>> {
        self.bins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_allocation(&self) -> MutexGuard<'_, VecDeque<SharedContainer>> {
        self.allocation_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Packing and dispatch counters.
    pub fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    /// The allocator's configuration.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Suggested fleet size: bins in use plus head-room, refreshed by every
    /// packing pass.
    pub fn target_workers(&self) -> usize {
        self.target_workers.load(Ordering::Relaxed)
    }

    /// Number of containers waiting for a dispatcher.
    pub fn allocation_queue_len(&self) -> usize {
        self.lock_allocation().len()
    }

    /// Comparable view of the current bin layout.
    pub fn bin_snapshots(&self) -> Vec<BinSnapshot> {
        self.lock_bins().iter().map(Bin::snapshot).collect()
    }

    /// Runs one packing pass; returns how many containers were handed to
    /// the allocation queue.
    ///
    /// Every item in the resulting layout whose status is `Packed` is
    /// queued, which covers both containers newly placed this pass and
    /// containers a failed dispatch reverted to `Packed`.
    pub fn pack_once(&self) -> usize {
        let mut bins = self.lock_bins();

        let drained = self.container_queue.drain();
        for container in &drained {
            let mut request = container.lock();
            for descriptor in &self.config.size_descriptors {
                if request.size_data.get(descriptor).is_none() {
                    // No telemetry yet for this image; assume the default share.
                    request
                        .size_data
                        .set(descriptor, self.config.default_cpu_share * 0.01);
                }
            }
        }

        let layout = std::mem::take(&mut *bins);
        let outcome = first_fit(
            drained,
            layout,
            &self.config.size_descriptors,
            self.config.safety_margin,
        );
        debug_assert!(
            outcome.rejected.is_empty(),
            "a fresh bin must admit any clamped request"
        );
        for container in &outcome.rejected {
            error!(image = %container.image_name(), "request rejected by packing, dropping");
        }
        *bins = outcome.bins;

        let mut queued = 0;
        {
            let mut allocation = self.lock_allocation();
            for bin in bins.iter() {
                for item in bin.items() {
                    let mut request = item.container().lock();
                    if request.bin_status == Some(BinStatus::Packed) {
                        request.bin_status = Some(BinStatus::Queued);
                        allocation.push_back(item.container().clone());
                        queued += 1;
                    }
                }
            }
        }

        let bin_count = bins.len();
        drop(bins);

        if queued > 0 {
            self.allocation_ready.notify_waiters();
        }
        let target = bin_count + overhead_workers(self.registry.active_workers());
        self.target_workers.store(target, Ordering::Relaxed);
        self.metrics.record_repack(queued as u64);
        debug!(queued, bins = bin_count, target, "packing pass complete");
        queued
    }

    /// Pops one container and dispatches it to its worker.
    ///
    /// Returns `None` when the allocation queue is empty. The allocation
    /// lock is released before the RPC is issued; on failure the container
    /// stays resident in its bin, reverted to `Packed`, so a later packing
    /// pass can queue it again.
    pub async fn dispatch_one(&self) -> Option<Result<ShortId, DispatchError>> {
        let container = self.lock_allocation().pop_front()?;
        let result = self.dispatch(&container).await;
        match &result {
            Ok(short_id) => {
                self.metrics.record_dispatch();
                info!(%short_id, image = %container.image_name(), "container started");
            }
            Err(error) => {
                self.metrics.record_dispatch_failure();
                warn!(image = %container.image_name(), %error, "dispatch failed, container stays packed");
                container.lock().bin_status = Some(BinStatus::Packed);
            }
        }
        Some(result)
    }

    async fn dispatch(&self, container: &SharedContainer) -> Result<ShortId, DispatchError> {
        let (bin_index, image_name, mut payload) = {
            let request = container.lock();
            let bin_index = request
                .bin_index
                .ok_or_else(|| DispatchError::Unplaced(request.image_name.clone()))?;
            (bin_index, request.image_name.clone(), request.clone())
        };

        let worker = self
            .registry
            .worker_by_bin_index(bin_index)
            .ok_or(DispatchError::UnknownBinIndex(bin_index))?;

        let cpu_share = self
            .registry
            .image_metadata(&image_name)
            .and_then(|metadata| metadata.cpu_share)
            .unwrap_or(self.config.default_cpu_share);
        payload.cpu_share = Some(cpu_share);

        // No lock is held from here on; the RPC can take as long as it takes.
        let short_id = self
            .client
            .start_container_boxed(worker.endpoint.clone(), payload)
            .await?;

        {
            let mut request = container.lock();
            request.short_id = Some(short_id.clone());
            request.bin_status = Some(BinStatus::Running);
        }
        self.registry
            .record_running(short_id.clone(), &image_name, bin_index);
        Ok(short_id)
    }

    /// Removes the container with the given short id from the layout,
    /// reclaiming its bin capacity. Returns `false` with no state change
    /// when the id is unknown.
    ///
    /// Called on externally reported termination; this is the only event
    /// that frees bin capacity.
    pub fn remove_container_by_id(&self, image: &str, short_id: &ShortId) -> bool {
        let removed = {
            let mut bins = self.lock_bins();
            bins.iter_mut().any(|bin| bin.remove_by_short_id(short_id))
        };
        if removed {
            self.registry.forget_running(short_id);
            self.metrics.record_removal();
            info!(image, %short_id, "container removed");
        } else {
            debug!(image, %short_id, "removal requested for unknown container");
        }
        removed
    }

    /// Evicts every container from the bin owned by a dead worker and pushes
    /// them back into the container queue as `Requeued`. Returns the number
    /// of containers evicted.
    pub fn requeue_bin(&self, bin_index: usize) -> usize {
        let items = {
            let mut bins = self.lock_bins();
            let Some(bin) = bins.iter_mut().find(|bin| bin.index() == bin_index) else {
                return 0;
            };
            bin.drain_items()
        };
        if items.is_empty() {
            return 0;
        }

        for item in &items {
            let container = item.container();
            {
                let mut request = container.lock();
                if let Some(short_id) = request.short_id.take() {
                    self.registry.forget_running(&short_id);
                }
                request.clear_placement();
                request.bin_status = Some(BinStatus::Requeued);
            }
            self.container_queue.put(container.clone());
        }
        let count = items.len();
        self.metrics.record_requeued(count as u64);
        warn!(bin_index, count, "worker lost, containers requeued");
        count
    }

    /// Spawns the packing loop and the dispatcher loops; all exit on
    /// `shutdown`.
    pub fn start(self: &Arc<Self>, shutdown: &ShutdownSignal) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(1 + self.config.dispatchers);

        {
            let allocator = Arc::clone(self);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(allocator.config.packing_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            allocator.pack_once();
                        }
                        () = shutdown.triggered() => break,
                    }
                }
                debug!("packing loop stopped");
            }));
        }

        for dispatcher_id in 0..self.config.dispatchers {
            let allocator = Arc::clone(self);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                debug!(dispatcher_id, "dispatcher started");
                loop {
                    if shutdown.is_triggered() {
                        break;
                    }
                    if allocator.dispatch_one().await.is_none() {
                        // Queue empty: wait for the packing loop's wake-up,
                        // with a poll tick as a safety net against missed
                        // notifications.
                        tokio::select! {
                            () = allocator.allocation_ready.notified() => {}
                            () = sleep(allocator.config.dispatch_poll_interval) => {}
                            () = shutdown.triggered() => break,
                        }
                    }
                }
                debug!(dispatcher_id, "dispatcher stopped");
            }));
        }

        tasks
    }
}

impl PlacementUpdates for ContainerAllocator {
    fn update_queued_containers(&self, image: &str, update: &ImageSizeUpdate) -> usize {
        let allocation = self.lock_allocation();
        let mut touched = 0;
        for container in allocation.iter() {
            let mut request = container.lock();
            if request.image_name != image {
                continue;
            }
            request.size_data.merge_from(&update.size_data);
            if let Some(cpu_share) = update.cpu_share {
                request.cpu_share = Some(cpu_share);
            }
            touched += 1;
        }
        touched
    }

    fn update_binned_containers(&self, update: &ImageSizeUpdate) -> usize {
        let mut bins = self.lock_bins();
        bins.iter_mut().map(|bin| bin.update_items(update)).sum()
    }
}
