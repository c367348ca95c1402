//! Worker profiler: propagates fresh per-image telemetry into pending
//! placements.
//!
//! Workers report locally averaged usage with their heartbeats; the registry
//! aggregates those into per-image metadata. This loop pushes the aggregates
//! back into every place a not-yet-running container waits (the container
//! queue, the allocation queue, and the bins) so the next packing decision
//! uses measured sizes instead of defaults. Running containers are left
//! untouched by the bin update rule, keeping the layout stable against live
//! telemetry.

use crate::config::ProfilerConfig;
use crate::queue::ContainerQueue;
use crate::registry::LookUpTable;
use crate::shutdown::ShutdownSignal;
use fabric_core::ImageSizeUpdate;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

/// The allocator-side capability the profiler needs: rewriting pending
/// placements by image.
///
/// The allocator implements this; handing the profiler a trait object
/// instead of the allocator itself keeps the ownership one-directional.
pub trait PlacementUpdates: Send + Sync {
    /// Rewrites matching containers in the allocation queue. Returns the
    /// number touched.
    fn update_queued_containers(&self, image: &str, update: &ImageSizeUpdate) -> usize;

    /// Rewrites matching, not-yet-running items in every bin. Returns the
    /// number touched.
    fn update_binned_containers(&self, update: &ImageSizeUpdate) -> usize;
}

/// Periodically refreshes the size estimates of every pending container from
/// the registry's aggregated image metadata.
pub struct WorkerProfiler {
    container_queue: Arc<ContainerQueue>,
    placements: Arc<dyn PlacementUpdates>,
    registry: Arc<LookUpTable>,
    config: ProfilerConfig,
}

impl WorkerProfiler {
    /// Creates a profiler over the given queue, placement handle, and
    /// registry.
    pub fn new(
        config: ProfilerConfig,
        container_queue: Arc<ContainerQueue>,
        placements: Arc<dyn PlacementUpdates>,
        registry: Arc<LookUpTable>,
    ) -> Self {
        Self {
            container_queue,
            placements,
            registry,
            config,
        }
    }

    /// Runs one propagation pass; returns the number of images refreshed.
    ///
    /// The profiler only reads metadata; it never writes telemetry.
    pub fn run_once(&self) -> usize {
        let metadata = self.registry.image_metadata_all();
        for (image, meta) in &metadata {
            let mut update = ImageSizeUpdate::new(image.clone(), meta.size_data.clone());
            update.cpu_share = meta.cpu_share;

            let in_queue = self.container_queue.update_containers(image, &update);
            let in_allocation = self.placements.update_queued_containers(image, &update);
            let in_bins = self.placements.update_binned_containers(&update);
            if in_queue + in_allocation + in_bins > 0 {
                debug!(image, in_queue, in_allocation, in_bins, "refreshed size estimates");
            }
        }
        metadata.len()
    }

    /// Spawns the propagation loop; exits on `shutdown`.
    pub fn start(self, shutdown: &ShutdownSignal) -> JoinHandle<()> {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(self.config.profiling_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                    () = shutdown.triggered() => break,
                }
            }
            debug!("profiler loop stopped");
        })
    }
}
