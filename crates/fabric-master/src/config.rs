//! Configuration for the resource-management loops.

use fabric_core::definitions::DEFAULT_DESCRIPTORS;
use std::time::Duration;

/// Configuration for the container allocator.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Seconds between repack passes.
    ///
    /// Default: 5s
    pub packing_interval: Duration,

    /// Number of concurrent dispatcher loops draining the allocation queue.
    ///
    /// Start-RPC latency dominates dispatch, so several loops run in
    /// parallel to keep the allocation queue from growing while the packing
    /// loop keeps producing.
    ///
    /// Default: 4
    pub dispatchers: usize,

    /// Safety-net poll interval for idle dispatchers.
    ///
    /// Dispatchers are woken by notification when the packing loop queues
    /// work; this interval bounds how long a missed notification can stall
    /// a dispatcher.
    ///
    /// Default: 500ms
    pub dispatch_poll_interval: Duration,

    /// Fallback CPU share (percent) for images with no telemetry yet.
    ///
    /// Also seeds missing size descriptors as `default_cpu_share * 0.01`
    /// before packing.
    ///
    /// Default: 50.0
    pub default_cpu_share: f64,

    /// Size descriptors the packing algorithm considers.
    ///
    /// Default: `avg_cpu`, `avg_memory`, `avg_network`
    pub size_descriptors: Vec<String>,

    /// Per-descriptor capacity fraction withheld from packing decisions.
    ///
    /// Set to 0.0 to disable the safety margin.
    ///
    /// Default: 0.05
    pub safety_margin: f64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            packing_interval: Duration::from_secs(5),
            dispatchers: 4,
            dispatch_poll_interval: Duration::from_millis(500),
            default_cpu_share: 50.0,
            size_descriptors: DEFAULT_DESCRIPTORS.iter().map(|d| (*d).to_owned()).collect(),
            safety_margin: 0.05,
        }
    }
}

impl AllocatorConfig {
    /// Sets the repack interval.
    pub fn with_packing_interval(mut self, interval: Duration) -> Self {
        self.packing_interval = interval;
        self
    }

    /// Sets the number of dispatcher loops.
    pub fn with_dispatchers(mut self, dispatchers: usize) -> Self {
        self.dispatchers = dispatchers;
        self
    }

    /// Packs along a single descriptor only.
    pub fn with_single_descriptor(mut self, descriptor: &str) -> Self {
        self.size_descriptors = vec![descriptor.to_owned()];
        self
    }

    /// Disables the packing safety margin.
    pub fn without_safety_margin(mut self) -> Self {
        self.safety_margin = 0.0;
        self
    }
}

/// Configuration for the worker profiler.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Seconds between metadata propagation passes.
    ///
    /// Default: 10s
    pub profiling_interval: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            profiling_interval: Duration::from_secs(10),
        }
    }
}

impl ProfilerConfig {
    /// Sets the propagation interval.
    pub fn with_profiling_interval(mut self, interval: Duration) -> Self {
        self.profiling_interval = interval;
        self
    }
}

/// Configuration for the load predictor's scale-up policy.
///
/// Rate-of-change thresholds are in pending messages per second; queue
/// limits are absolute depths. The policy only grows the container
/// population; containers shrink solely through termination reported from
/// the workers.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Sampling period; also the divisor for rate-of-change.
    ///
    /// Default: 10s
    pub step_length: Duration,

    /// Rate of change above which a small increment is issued.
    ///
    /// Default: 5.0 msgs/s
    pub roc_positive_lower: f64,

    /// Rate of change above which a large increment is issued.
    ///
    /// Default: 20.0 msgs/s
    pub roc_positive_upper: f64,

    /// Below this rate a deep queue is considered draining and only earns a
    /// small increment.
    ///
    /// Default: -5.0 msgs/s
    pub roc_minimum: f64,

    /// Queue depth above which increments are issued regardless of slope.
    ///
    /// Default: 100
    pub queue_length_limit: u64,

    /// Debounce: minimum time between two scale-ups for the same image.
    ///
    /// Default: 60s
    pub wait_time: Duration,

    /// Containers added on a strong signal.
    ///
    /// Default: 3
    pub large_increment: usize,

    /// Containers added on a weak signal.
    ///
    /// Default: 1
    pub small_increment: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            step_length: Duration::from_secs(10),
            roc_positive_lower: 5.0,
            roc_positive_upper: 20.0,
            roc_minimum: -5.0,
            queue_length_limit: 100,
            wait_time: Duration::from_secs(60),
            large_increment: 3,
            small_increment: 1,
        }
    }
}

impl PredictorConfig {
    /// Sets the sampling period.
    pub fn with_step_length(mut self, step_length: Duration) -> Self {
        self.step_length = step_length;
        self
    }

    /// Sets the scale-up debounce window.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Sets both rate-of-change trigger thresholds.
    pub fn with_roc_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.roc_positive_lower = lower;
        self.roc_positive_upper = upper;
        self
    }
}

/// Top-level configuration for the master's resource-management core.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Allocator settings.
    pub allocator: AllocatorConfig,
    /// Profiler settings.
    pub profiler: ProfilerConfig,
    /// Predictor settings.
    pub predictor: PredictorConfig,
    /// Whether the load predictor runs at all.
    pub autoscaling: bool,
    /// Heartbeat age beyond which a worker counts as dead.
    pub worker_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterConfig {
    /// Default configuration with autoscaling enabled.
    pub fn new() -> Self {
        Self {
            allocator: AllocatorConfig::default(),
            profiler: ProfilerConfig::default(),
            predictor: PredictorConfig::default(),
            autoscaling: true,
            worker_timeout: Duration::from_secs(30),
        }
    }

    /// Disables the load predictor; containers are then only created by
    /// explicit requests.
    pub fn without_autoscaling(mut self) -> Self {
        self.autoscaling = false;
        self
    }
}
