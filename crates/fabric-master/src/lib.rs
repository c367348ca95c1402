//! Master-side resource management for a distributed stream-processing
//! fabric.
//!
//! The master decides which container instances run on which worker: it
//! queues incoming container requests, packs them into per-worker bins,
//! dispatches start-RPCs, keeps size estimates fresh from worker telemetry,
//! and autoscales the container population from message-queue pressure.
//!
//! # Architecture
//!
//! ```text
//!                    ┌────────────────┐  drain   ┌───────────────┐
//!  requests ───────► │ ContainerQueue │ ───────► │ packing loop  │
//!  (RPC, predictor)  └────────────────┘          │  (first-fit)  │
//!                                                └──────┬────────┘
//!                    ┌────────────────┐   pop           │ place
//!  start-RPCs ◄───── │ dispatcher × N │ ◄──────  allocation queue
//!  to workers        └────────────────┘
//! ```
//!
//! The [`ContainerAllocator`] owns the bin layout, the authoritative
//! placement. The [`WorkerProfiler`] rewrites pending size estimates from
//! the [`LookUpTable`]'s aggregated telemetry, and the [`LoadPredictor`]
//! feeds new requests into the queue when the [`MessagesQueue`] backs up.
//! [`FabricMaster`] wires the pieces together and runs the loops.
//!
//! The deterministic placement model (bins, size vectors, first-fit) lives
//! in the `fabric-core` crate; this crate adds the concurrency around it.

pub mod allocator;
pub mod client;
pub mod config;
pub mod error;
pub mod master;
pub mod messages;
pub mod metrics;
pub mod predictor;
pub mod profiler;
pub mod queue;
pub mod registry;
pub mod shutdown;

pub use allocator::{ContainerAllocator, overhead_workers};
pub use client::{
    HttpWorkerClient, RetryConfig, RetryingWorkerClient, WorkerClient, WorkerClientBoxed,
};
pub use config::{AllocatorConfig, MasterConfig, PredictorConfig, ProfilerConfig};
pub use error::DispatchError;
pub use master::FabricMaster;
pub use messages::MessagesQueue;
pub use metrics::AllocatorMetrics;
pub use predictor::{ImageTrack, LoadPredictor, ScaleDecision};
pub use profiler::{PlacementUpdates, WorkerProfiler};
pub use queue::ContainerQueue;
pub use registry::{
    ImageMetadata, LocalImageStats, LookUpTable, RunningContainer, WorkerEndpoint, WorkerRecord,
};
pub use shutdown::ShutdownSignal;
