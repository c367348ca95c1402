//! End-to-end tests over the resource core: pack → dispatch → run →
//! terminate, with profiler and predictor feedback in between.

use fabric_core::definitions::{AVG_CPU, BinStatus};
use fabric_core::{ContainerRequest, SharedContainer, ShortId};
use fabric_master::{
    AllocatorConfig, ContainerAllocator, ContainerQueue, DispatchError, FabricMaster,
    LocalImageStats, LookUpTable, MasterConfig, PlacementUpdates, PredictorConfig,
    ProfilerConfig, WorkerClient, WorkerEndpoint, WorkerProfiler,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Worker-client double: hands out sequential short ids and records every
/// start request it sees.
struct TestWorkerClient {
    started: Mutex<Vec<(WorkerEndpoint, ContainerRequest)>>,
    next_id: AtomicU64,
    fail: AtomicBool,
}

impl TestWorkerClient {
    fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0xa0),
            fail: AtomicBool::new(false),
        }
    }

    fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    fn started(&self) -> Vec<(WorkerEndpoint, ContainerRequest)> {
        self.started.lock().unwrap().clone()
    }
}

impl WorkerClient for TestWorkerClient {
    async fn start_container(
        &self,
        worker: WorkerEndpoint,
        request: ContainerRequest,
    ) -> Result<ShortId, DispatchError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(DispatchError::Transport("worker unreachable".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let short_id = ShortId::parse(&format!("{id:012x}")).unwrap();
        self.started.lock().unwrap().push((worker, request));
        Ok(short_id)
    }

    fn name(&self) -> &str {
        "test"
    }
}

fn single_descriptor_config() -> AllocatorConfig {
    AllocatorConfig::default().with_single_descriptor(AVG_CPU)
}

fn local_stats(cpu: f64, instances: u64) -> LocalImageStats {
    LocalImageStats {
        size_data: [(AVG_CPU, cpu)].into_iter().collect(),
        instances,
    }
}

#[tokio::test]
async fn container_progresses_packed_queued_running() {
    let queue = Arc::new(ContainerQueue::new());
    let registry = Arc::new(LookUpTable::new());
    let client = Arc::new(TestWorkerClient::new());
    let allocator = ContainerAllocator::new(
        single_descriptor_config(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        client.clone(),
    );

    registry.register_worker("10.0.0.1", 8081);
    let container =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.3));
    queue.put(container.clone());

    // Absent before packing, Queued after (Packed is transitional inside the
    // pass), Running after dispatch.
    assert_eq!(container.status(), None);
    allocator.pack_once();
    assert_eq!(container.status(), Some(BinStatus::Queued));
    allocator.dispatch_one().await.unwrap().unwrap();
    assert_eq!(container.status(), Some(BinStatus::Running));

    let started = client.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0.address, "10.0.0.1");
    assert_eq!(started[0].0.port, 8081);
    // The wire payload still carried the pre-dispatch status.
    assert_eq!(started[0].1.bin_status, Some(BinStatus::Queued));
    assert!(started[0].1.cpu_share.is_some());
}

#[tokio::test]
async fn dispatch_targets_the_worker_matching_the_bin() {
    let queue = Arc::new(ContainerQueue::new());
    let registry = Arc::new(LookUpTable::new());
    let client = Arc::new(TestWorkerClient::new());
    let allocator = ContainerAllocator::new(
        single_descriptor_config(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        client.clone(),
    );

    for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        registry.register_worker(address, 8081);
    }
    // 0.6-sized containers fill one bin each: c lands in bin 2.
    for image in ["img/a", "img/b", "img/c"] {
        queue.put(SharedContainer::new(
            ContainerRequest::new(image).with_size(AVG_CPU, 0.6),
        ));
    }
    allocator.pack_once();
    while allocator.dispatch_one().await.is_some() {}

    let to_third_worker: Vec<_> = client
        .started()
        .into_iter()
        .filter(|(worker, _)| worker.address == "10.0.0.3")
        .collect();
    assert_eq!(to_third_worker.len(), 1);
    assert_eq!(to_third_worker[0].1.image_name, "img/c");
    assert_eq!(to_third_worker[0].1.bin_index, Some(2));
}

#[tokio::test]
async fn profiler_feedback_resizes_pending_but_not_running() {
    let queue = Arc::new(ContainerQueue::new());
    let registry = Arc::new(LookUpTable::new());
    let client = Arc::new(TestWorkerClient::new());
    let allocator = Arc::new(ContainerAllocator::new(
        single_descriptor_config(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        client.clone(),
    ));
    let profiler = WorkerProfiler::new(
        ProfilerConfig::default(),
        Arc::clone(&queue),
        Arc::clone(&allocator) as Arc<dyn PlacementUpdates>,
        Arc::clone(&registry),
    );

    registry.register_worker("10.0.0.1", 8081);

    // One container gets all the way to Running, one stays packed (no
    // dispatch), one waits in the container queue.
    let running =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.2));
    queue.put(running.clone());
    allocator.pack_once();
    allocator.dispatch_one().await.unwrap().unwrap();

    let binned =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.2));
    queue.put(binned.clone());
    allocator.pack_once();

    let pending =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.2));
    queue.put(pending.clone());

    // Fresh fleet telemetry arrives: the image actually uses 0.5.
    registry.update_worker_stats(
        "10.0.0.1",
        8081,
        [("img/op:1".to_owned(), local_stats(0.5, 2))]
            .into_iter()
            .collect(),
    );
    profiler.run_once();

    assert_eq!(pending.lock().size_data.fraction(AVG_CPU), 0.5);
    assert_eq!(binned.lock().size_data.fraction(AVG_CPU), 0.5);
    // The running container's size is frozen.
    assert_eq!(running.lock().size_data.fraction(AVG_CPU), 0.2);
}

#[tokio::test]
async fn worker_failure_requeues_and_a_replacement_recovers() {
    let queue = Arc::new(ContainerQueue::new());
    let registry = Arc::new(LookUpTable::new());
    let client = Arc::new(TestWorkerClient::new());
    let allocator = ContainerAllocator::new(
        single_descriptor_config(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        client.clone(),
    );

    registry.register_worker("10.0.0.1", 8081);
    let container =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.4));
    queue.put(container.clone());
    allocator.pack_once();
    allocator.dispatch_one().await.unwrap().unwrap();
    assert_eq!(container.status(), Some(BinStatus::Running));

    // The worker dies: its bin is evicted and the container recycles.
    let bin_index = registry.deregister_worker("10.0.0.1", 8081).unwrap();
    assert_eq!(allocator.requeue_bin(bin_index), 1);
    assert_eq!(container.status(), Some(BinStatus::Requeued));
    assert!(container.lock().short_id.is_none());

    // A replacement node adopts the freed bin and the container restarts.
    assert_eq!(registry.register_worker("10.0.0.9", 8081), bin_index);
    allocator.pack_once();
    allocator.dispatch_one().await.unwrap().unwrap();
    assert_eq!(container.status(), Some(BinStatus::Running));
    assert_eq!(client.started().last().unwrap().0.address, "10.0.0.9");
}

#[tokio::test]
async fn termination_is_the_only_capacity_release() {
    let queue = Arc::new(ContainerQueue::new());
    let registry = Arc::new(LookUpTable::new());
    let client = Arc::new(TestWorkerClient::new());
    let allocator = ContainerAllocator::new(
        single_descriptor_config(),
        Arc::clone(&queue),
        Arc::clone(&registry),
        client.clone(),
    );

    registry.register_worker("10.0.0.1", 8081);
    let container =
        SharedContainer::new(ContainerRequest::new("img/op:1").with_size(AVG_CPU, 0.7));
    queue.put(container.clone());
    allocator.pack_once();
    allocator.dispatch_one().await.unwrap().unwrap();

    // A second 0.7 container cannot share bin 0 while the first lives.
    queue.put(SharedContainer::new(
        ContainerRequest::new("img/op:2").with_size(AVG_CPU, 0.7),
    ));
    allocator.pack_once();
    assert_eq!(allocator.bin_snapshots().len(), 2);

    let short_id = container.lock().short_id.clone().unwrap();
    assert!(allocator.remove_container_by_id("img/op:1", &short_id));
    let snapshots = allocator.bin_snapshots();
    assert!(snapshots[0].items.is_empty());
    assert_eq!(snapshots[0].free_space.fraction(AVG_CPU), 1.0);

    // Unknown ids are rejected without state change.
    let bogus = ShortId::parse("deadbeef0000").unwrap();
    assert!(!allocator.remove_container_by_id("img/op:1", &bogus));
}

#[tokio::test]
async fn full_runtime_round_trip() {
    let config = MasterConfig {
        allocator: AllocatorConfig::default()
            .with_single_descriptor(AVG_CPU)
            .with_packing_interval(Duration::from_millis(20))
            .with_dispatchers(2),
        profiler: ProfilerConfig::default()
            .with_profiling_interval(Duration::from_millis(50)),
        predictor: PredictorConfig::default()
            .with_step_length(Duration::from_millis(40))
            .with_wait_time(Duration::from_millis(200)),
        autoscaling: true,
        worker_timeout: Duration::from_secs(30),
    };
    let client = Arc::new(TestWorkerClient::new());
    let master = FabricMaster::start(config, client.clone());

    master.registry().register_worker("10.0.0.1", 8081);
    master.registry().register_worker("10.0.0.2", 8081);

    // Explicit submissions flow to workers via the loops.
    for image in ["img/a", "img/b"] {
        master.submit_container(ContainerRequest::new(image).with_size(AVG_CPU, 0.3));
    }
    // Ingestion pressure triggers the predictor for a third image.
    master.messages().push_many("img/hot", 5_000);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(client.started_count() >= 2, "explicit submissions dispatched");
    let images: Vec<String> = client
        .started()
        .into_iter()
        .map(|(_, request)| request.image_name)
        .collect();
    assert!(images.contains(&"img/hot".to_owned()), "predictor scaled up img/hot");

    let running = master.registry().running_containers();
    assert!(!running.is_empty());

    master.shutdown().await;
    let dispatched = client.started_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.started_count(), dispatched, "no dispatch after shutdown");
}

#[tokio::test]
async fn autoscaling_off_means_no_predictor() {
    let config = MasterConfig {
        allocator: AllocatorConfig::default()
            .with_single_descriptor(AVG_CPU)
            .with_packing_interval(Duration::from_millis(20)),
        profiler: ProfilerConfig::default(),
        predictor: PredictorConfig::default().with_step_length(Duration::from_millis(20)),
        autoscaling: false,
        worker_timeout: Duration::from_secs(30),
    };
    let client = Arc::new(TestWorkerClient::new());
    let master = FabricMaster::start(config, client.clone());

    master.registry().register_worker("10.0.0.1", 8081);
    master.messages().push_many("img/hot", 10_000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client.started_count(), 0);
    assert!(master.container_queue().is_empty());
    master.shutdown().await;
}

#[tokio::test]
async fn worker_failure_through_the_master_facade() {
    let config = MasterConfig {
        allocator: AllocatorConfig::default()
            .with_single_descriptor(AVG_CPU)
            .with_packing_interval(Duration::from_millis(20)),
        profiler: ProfilerConfig::default(),
        predictor: PredictorConfig::default(),
        autoscaling: false,
        worker_timeout: Duration::from_secs(30),
    };
    let client = Arc::new(TestWorkerClient::new());
    let master = FabricMaster::start(config, client.clone());

    master.registry().register_worker("10.0.0.1", 8081);
    master.submit_container(ContainerRequest::new("img/a").with_size(AVG_CPU, 0.4));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.started_count(), 1);

    assert_eq!(master.handle_worker_failure("10.0.0.1", 8081), 1);
    assert_eq!(master.handle_worker_failure("10.0.0.1", 8081), 0);
    assert!(master.registry().running_containers().is_empty());

    // With a replacement worker the requeued container restarts.
    master.registry().register_worker("10.0.0.2", 8081);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.started_count(), 2);

    let mut stats = HashMap::new();
    stats.insert("img/a".to_owned(), local_stats(0.4, 1));
    assert!(master.registry().update_worker_stats("10.0.0.2", 8081, stats));

    master.shutdown().await;
}
