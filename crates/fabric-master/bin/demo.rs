//! # Resource-core demo
//!
//! An in-process simulation of the master's resource-management loops: a
//! synthetic worker fleet, randomized ingestion pressure, and the full
//! pack → dispatch → run pipeline with autoscaling.
//!
//! Demonstrates:
//!
//! - explicit container submission and predictor-driven scale-up
//! - first-fit placement across a three-worker fleet
//! - dispatch resilience against a flaky worker runtime (10% failure rate)
//! - live metrics and a final statistics printout
//! - graceful shutdown draining every loop
//!
//! ## Running
//!
//! ```bash
//! RUST_LOG=info cargo run -p fabric-master --bin fabric-demo
//! ```

use anyhow::Result;
use fabric_core::definitions::AVG_CPU;
use fabric_core::{ContainerRequest, ShortId};
use fabric_master::{
    AllocatorConfig, DispatchError, FabricMaster, MasterConfig, PredictorConfig,
    ProfilerConfig, WorkerClient, WorkerEndpoint,
};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Worker-runtime stand-in: assigns short ids locally and fails a fraction
/// of start requests to exercise the revive-on-repack path.
struct SimulatedWorkerRuntime {
    failure_rate: f64,
    next_id: AtomicU64,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl SimulatedWorkerRuntime {
    fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate,
            next_id: AtomicU64::new(1),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl WorkerClient for SimulatedWorkerRuntime {
    async fn start_container(
        &self,
        worker: WorkerEndpoint,
        _request: ContainerRequest,
    ) -> Result<ShortId, DispatchError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        // A little start-RPC latency.
        tokio::time::sleep(Duration::from_millis(5)).await;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::Rejected {
                address: worker.address,
                port: worker.port,
                status: 503,
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(ShortId::parse(&format!("{id:012x}")).expect("generated ids are hex"))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = MasterConfig {
        allocator: AllocatorConfig::default()
            .with_single_descriptor(AVG_CPU)
            .with_packing_interval(Duration::from_millis(250)),
        profiler: ProfilerConfig::default()
            .with_profiling_interval(Duration::from_millis(500)),
        predictor: PredictorConfig::default()
            .with_step_length(Duration::from_millis(500))
            .with_wait_time(Duration::from_secs(2)),
        autoscaling: true,
        worker_timeout: Duration::from_secs(30),
    };

    let runtime = Arc::new(SimulatedWorkerRuntime::new(0.1));
    let master = FabricMaster::start(config, runtime.clone());

    for (address, port) in [("10.0.0.1", 8081), ("10.0.0.2", 8081), ("10.0.0.3", 8081)] {
        master.registry().register_worker(address, port);
    }

    // A couple of explicitly requested operators.
    master.submit_container(ContainerRequest::new("demo/parser:1").with_size(AVG_CPU, 0.3));
    master.submit_container(ContainerRequest::new("demo/enricher:1").with_size(AVG_CPU, 0.25));

    // Randomized ingestion pressure on a third image; the predictor reacts.
    {
        let messages = Arc::clone(master.messages());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            loop {
                ticker.tick().await;
                let burst = rand::thread_rng().gen_range(50..400);
                messages.push_many("demo/classifier:2", burst);
            }
        });
    }

    // Let the loops run and report along the way.
    for second in 1..=5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let metrics = master.allocator().metrics();
        info!(
            second,
            packed = metrics.containers_packed(),
            dispatched = metrics.containers_dispatched(),
            failures = metrics.dispatch_failures(),
            bins = master.allocator().bin_snapshots().len(),
            target_workers = master.allocator().target_workers(),
            "progress"
        );
    }

    // Report a termination for one running container.
    if let Some((short_id, running)) = master.registry().running_containers().into_iter().next() {
        master.remove_container(&running.image_name, &short_id);
        info!(%short_id, image = running.image_name, "reported termination");
    }

    let metrics = master.allocator().metrics();
    println!("=== final statistics ===");
    println!("packing passes:      {}", metrics.repack_passes());
    println!("containers packed:   {}", metrics.containers_packed());
    println!("containers running:  {}", master.registry().running_containers().len());
    println!("dispatch attempts:   {}", runtime.attempts.load(Ordering::Relaxed));
    println!("dispatch failures:   {}", runtime.failures.load(Ordering::Relaxed));
    println!("containers removed:  {}", metrics.containers_removed());
    println!("suggested workers:   {}", master.allocator().target_workers());

    master.shutdown().await;
    Ok(())
}
