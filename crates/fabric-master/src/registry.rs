//! Registry of workers, running containers, and per-image metadata.
//!
//! One process-wide table, dependency-injected as an `Arc<LookUpTable>` so
//! tests can instantiate fresh copies. Workers appear on their first
//! registration and leave on explicit deregistration or heartbeat timeout;
//! per-image metadata is long-lived and recomputed from the workers' local
//! stats after every report.

use fabric_core::{ShortId, SizeVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Address/port pair the dispatcher sends start-RPCs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// Worker node address.
    #[serde(rename = "node_addr")]
    pub address: String,
    /// Worker node port.
    #[serde(rename = "node_port")]
    pub port: u16,
}

impl std::fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A worker's locally measured per-image averages plus how many instances
/// of the image it currently runs. Reported with every heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalImageStats {
    /// Locally averaged size descriptors for the image.
    pub size_data: SizeVector,
    /// Number of instances of the image on this worker.
    pub instances: u64,
}

/// One registered worker node.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Where the worker's container runtime listens.
    pub endpoint: WorkerEndpoint,
    /// The bin this worker owns; assigned at registration.
    pub bin_index: usize,
    /// The worker's latest per-image stats report.
    pub local_stats: HashMap<String, LocalImageStats>,
    /// When the worker last registered or reported.
    pub last_seen: Instant,
}

/// Fleet-wide aggregated metadata for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    /// Instance-weighted average of the workers' local size descriptors.
    pub size_data: SizeVector,
    /// Relative CPU share handed to workers starting this image.
    pub cpu_share: Option<f64>,
}

/// A container the dispatcher has successfully started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    /// Image the container runs.
    pub image_name: String,
    /// Bin (and worker) the container lives on.
    pub bin_index: usize,
}

#[derive(Debug, Default)]
struct Tables {
    workers: Vec<WorkerRecord>,
    images: HashMap<String, ImageMetadata>,
    running: HashMap<ShortId, RunningContainer>,
}

/// The master's view of the fleet.
#[derive(Debug, Default)]
pub struct LookUpTable {
    tables: RwLock<Tables>,
}

impl LookUpTable {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a worker (or refreshes its heartbeat) and returns the bin
    /// index it owns.
    ///
    /// A new worker takes the lowest bin index no active worker holds, so a
    /// replacement node adopts the bin a failed node left behind.
    pub fn register_worker(&self, address: &str, port: u16) -> usize {
        let mut tables = self.write();
        if let Some(worker) = tables
            .workers
            .iter_mut()
            .find(|w| w.endpoint.address == address && w.endpoint.port == port)
        {
            worker.last_seen = Instant::now();
            return worker.bin_index;
        }

        let mut bin_index = 0;
        while tables.workers.iter().any(|w| w.bin_index == bin_index) {
            bin_index += 1;
        }
        info!(address, port, bin_index, "worker registered");
        tables.workers.push(WorkerRecord {
            endpoint: WorkerEndpoint {
                address: address.to_owned(),
                port,
            },
            bin_index,
            local_stats: HashMap::new(),
            last_seen: Instant::now(),
        });
        bin_index
    }

    /// Stores a worker's per-image stats report and refreshes the aggregated
    /// image metadata. Returns `false` when the worker is unknown.
    pub fn update_worker_stats(
        &self,
        address: &str,
        port: u16,
        stats: HashMap<String, LocalImageStats>,
    ) -> bool {
        let mut tables = self.write();
        let Some(worker) = tables
            .workers
            .iter_mut()
            .find(|w| w.endpoint.address == address && w.endpoint.port == port)
        else {
            warn!(address, port, "stats report from unregistered worker");
            return false;
        };
        worker.local_stats = stats;
        worker.last_seen = Instant::now();
        Self::aggregate(&mut tables);
        true
    }

    /// Removes a worker, returning the bin index it held.
    pub fn deregister_worker(&self, address: &str, port: u16) -> Option<usize> {
        let mut tables = self.write();
        let position = tables
            .workers
            .iter()
            .position(|w| w.endpoint.address == address && w.endpoint.port == port)?;
        let worker = tables.workers.remove(position);
        Self::aggregate(&mut tables);
        info!(address, port, bin_index = worker.bin_index, "worker deregistered");
        Some(worker.bin_index)
    }

    /// Removes every worker whose last heartbeat is older than `timeout`,
    /// returning the removed records.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<WorkerRecord> {
        let mut tables = self.write();
        let now = Instant::now();
        let mut stale = Vec::new();
        tables.workers.retain(|worker| {
            if now.duration_since(worker.last_seen) > timeout {
                stale.push(worker.clone());
                false
            } else {
                true
            }
        });
        if !stale.is_empty() {
            Self::aggregate(&mut tables);
            for worker in &stale {
                warn!(endpoint = %worker.endpoint, bin_index = worker.bin_index, "worker heartbeat timed out");
            }
        }
        stale
    }

    /// The worker owning `bin_index`, if any.
    pub fn worker_by_bin_index(&self, bin_index: usize) -> Option<WorkerRecord> {
        self.read()
            .workers
            .iter()
            .find(|w| w.bin_index == bin_index)
            .cloned()
    }

    /// Snapshot of every registered worker.
    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.read().workers.clone()
    }

    /// Number of registered workers.
    pub fn active_workers(&self) -> usize {
        self.read().workers.len()
    }

    /// Aggregated metadata for one image.
    pub fn image_metadata(&self, image: &str) -> Option<ImageMetadata> {
        self.read().images.get(image).cloned()
    }

    /// Snapshot of the aggregated metadata for every known image.
    pub fn image_metadata_all(&self) -> HashMap<String, ImageMetadata> {
        self.read().images.clone()
    }

    /// Sets the relative CPU share handed to workers starting `image`.
    pub fn set_cpu_share(&self, image: &str, cpu_share: f64) {
        self.write().images.entry(image.to_owned()).or_default().cpu_share = Some(cpu_share);
    }

    /// Books a successfully started container.
    pub fn record_running(&self, short_id: ShortId, image: &str, bin_index: usize) {
        debug!(%short_id, image, bin_index, "container running");
        self.write().running.insert(
            short_id,
            RunningContainer {
                image_name: image.to_owned(),
                bin_index,
            },
        );
    }

    /// Forgets a terminated container. Returns its booking, if any.
    pub fn forget_running(&self, short_id: &ShortId) -> Option<RunningContainer> {
        self.write().running.remove(short_id)
    }

    /// Snapshot of every container the dispatcher believes is running.
    pub fn running_containers(&self) -> HashMap<ShortId, RunningContainer> {
        self.read().running.clone()
    }

    /// Recomputes every image's aggregated size data as the instance-weighted
    /// mean of the workers' local averages:
    /// `size[d] = Σ(worker_local_avg[d] · local_count) / Σ local_count`.
    ///
    /// Images no worker reports anymore keep their last aggregate: metadata
    /// is long-lived so a temporarily scaled-to-zero image does not lose its
    /// sizing history. Configured CPU shares are preserved.
    fn aggregate(tables: &mut Tables) {
        // Weighted sums can exceed 1.0 mid-computation, so accumulate in a
        // plain map and only normalize into a SizeVector at the end.
        let mut sums: HashMap<String, (HashMap<String, f64>, u64)> = HashMap::new();
        for worker in &tables.workers {
            for (image, local) in &worker.local_stats {
                if local.instances == 0 {
                    continue;
                }
                let (sum, count) = sums.entry(image.clone()).or_default();
                for (descriptor, value) in local.size_data.iter() {
                    *sum.entry(descriptor.to_owned()).or_insert(0.0) +=
                        value * local.instances as f64;
                }
                *count += local.instances;
            }
        }

        for (image, (sum, count)) in sums {
            if count == 0 {
                continue;
            }
            let entry = tables.images.entry(image).or_default();
            let mut averaged = SizeVector::new();
            for (descriptor, weighted) in sum {
                averaged.set(&descriptor, weighted / count as f64);
            }
            entry.size_data = averaged;
        }
    }
}
