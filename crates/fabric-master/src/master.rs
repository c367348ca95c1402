//! Top-level wiring of the resource-management core.

use crate::allocator::ContainerAllocator;
use crate::client::WorkerClientBoxed;
use crate::config::MasterConfig;
use crate::messages::MessagesQueue;
use crate::predictor::LoadPredictor;
use crate::profiler::{PlacementUpdates, WorkerProfiler};
use crate::queue::ContainerQueue;
use crate::registry::LookUpTable;
use crate::shutdown::ShutdownSignal;
use fabric_core::{ContainerRequest, SharedContainer, ShortId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The master's resource-management core: queues, registry, allocator, and
/// the background loops driving them.
///
/// The master owns every component; the profiler and predictor only receive
/// narrow handles (the container queue, the placement-update capability), so
/// there are no reference cycles back into the allocator.
pub struct FabricMaster {
    container_queue: Arc<ContainerQueue>,
    messages: Arc<MessagesQueue>,
    registry: Arc<LookUpTable>,
    allocator: Arc<ContainerAllocator>,
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl FabricMaster {
    /// Builds the core and spawns its loops: packing, dispatchers, profiler,
    /// and, unless autoscaling is disabled, the load predictor.
    pub fn start(config: MasterConfig, client: Arc<dyn WorkerClientBoxed>) -> Self {
        let container_queue = Arc::new(ContainerQueue::new());
        let messages = Arc::new(MessagesQueue::new());
        let registry = Arc::new(LookUpTable::new());
        let allocator = Arc::new(ContainerAllocator::new(
            config.allocator.clone(),
            Arc::clone(&container_queue),
            Arc::clone(&registry),
            client,
        ));

        let shutdown = ShutdownSignal::new();
        let mut tasks = allocator.start(&shutdown);

        let profiler = WorkerProfiler::new(
            config.profiler.clone(),
            Arc::clone(&container_queue),
            Arc::clone(&allocator) as Arc<dyn PlacementUpdates>,
            Arc::clone(&registry),
        );
        tasks.push(profiler.start(&shutdown));

        if config.autoscaling {
            let predictor = LoadPredictor::new(
                config.predictor.clone(),
                Arc::clone(&messages),
                Arc::clone(&container_queue),
            );
            tasks.push(predictor.start(&shutdown));
            info!("resource core started, autoscaling enabled");
        } else {
            info!("resource core started, autoscaling disabled");
        }

        Self {
            container_queue,
            messages,
            registry,
            allocator,
            shutdown,
            tasks,
        }
    }

    /// Submits an explicit container request for packing.
    pub fn submit_container(&self, request: ContainerRequest) {
        self.container_queue.put(SharedContainer::new(request));
    }

    /// Handles an externally reported container termination.
    pub fn remove_container(&self, image: &str, short_id: &ShortId) -> bool {
        self.allocator.remove_container_by_id(image, short_id)
    }

    /// Handles a worker failure: deregisters the node and requeues every
    /// container from its bin. Returns the number of containers requeued.
    pub fn handle_worker_failure(&self, address: &str, port: u16) -> usize {
        match self.registry.deregister_worker(address, port) {
            Some(bin_index) => self.allocator.requeue_bin(bin_index),
            None => {
                warn!(address, port, "failure reported for unknown worker");
                0
            }
        }
    }

    /// Deregisters every worker whose heartbeat is older than the configured
    /// timeout and requeues their containers. Returns the number of workers
    /// expired.
    ///
    /// Heartbeat bookkeeping itself is external; callers invoke this from
    /// their maintenance path.
    pub fn expire_stale_workers(&self, timeout: std::time::Duration) -> usize {
        let stale = self.registry.prune_stale(timeout);
        for worker in &stale {
            self.allocator.requeue_bin(worker.bin_index);
        }
        stale.len()
    }

    /// The queue of containers awaiting packing.
    pub fn container_queue(&self) -> &Arc<ContainerQueue> {
        &self.container_queue
    }

    /// The ingestion path's pending-message counters.
    pub fn messages(&self) -> &Arc<MessagesQueue> {
        &self.messages
    }

    /// The worker / image registry.
    pub fn registry(&self) -> &Arc<LookUpTable> {
        &self.registry
    }

    /// The allocator, for placement inspection and metrics.
    pub fn allocator(&self) -> &Arc<ContainerAllocator> {
        &self.allocator
    }

    /// Signals every loop to stop and waits for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(error) = task.await {
                warn!(%error, "loop task ended abnormally");
            }
        }
        info!("resource core stopped");
    }
}
