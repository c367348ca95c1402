//! Shared wire vocabulary.
//!
//! These are the only field names and status strings that cross process
//! boundaries (master ↔ worker ↔ data source). Everything that serializes a
//! container request, a worker report, or a placement decision must spell
//! its keys with the constants below; internal code must not redefine
//! equivalents.

use serde::{Deserialize, Serialize};

/// Container image name, e.g. `"repo/streaming-op:1.4"`.
pub const IMAGE_NAME: &str = "c_name";

/// Worker-assigned 12-character hex container id.
pub const SHORT_ID: &str = "c_sid";

/// Worker node address.
pub const NODE_ADDR: &str = "node_addr";

/// Worker node port.
pub const NODE_PORT: &str = "node_port";

/// Index of the bin (and therefore the worker) a container is placed in.
pub const BIN_INDEX: &str = "bin_index";

/// Placement lifecycle tag, see [`BinStatus`].
pub const BIN_STATUS: &str = "bin_status";

/// Mapping of size descriptors to capacity fractions.
pub const SIZE_DATA: &str = "size_data";

/// Relative CPU share handed to the worker's container runtime.
pub const CPU_SHARE: &str = "cpu_share";

/// Prefix shared by every size descriptor.
pub const AVG_PREFIX: &str = "avg_";

/// Average CPU usage, fraction of one worker's capacity in `[0, 1]`.
pub const AVG_CPU: &str = "avg_cpu";

/// Average memory usage, fraction of one worker's capacity in `[0, 1]`.
pub const AVG_MEMORY: &str = "avg_memory";

/// Average network usage, fraction of one worker's capacity in `[0, 1]`.
pub const AVG_NETWORK: &str = "avg_network";

/// Every descriptor the packing algorithm considers by default.
pub const DEFAULT_DESCRIPTORS: [&str; 3] = [AVG_CPU, AVG_MEMORY, AVG_NETWORK];

/// Placement lifecycle of a container request.
///
/// A request is packed into a bin, queued for dispatch, and finally running
/// on its worker. `Requeued` marks a container whose worker died mid-flight;
/// it re-enters the container queue and restarts the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinStatus {
    /// Placed in a bin by the packing algorithm, not yet handed to a dispatcher.
    Packed,
    /// Sitting in the allocation queue, start-RPC not yet acknowledged.
    Queued,
    /// Started on its worker; size data is frozen from here on.
    Running,
    /// Evicted by a worker failure, waiting to be packed again.
    Requeued,
}

impl BinStatus {
    /// The on-wire spelling of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            BinStatus::Packed => "packed",
            BinStatus::Queued => "queued",
            BinStatus::Running => "running",
            BinStatus::Requeued => "requeued",
        }
    }
}

impl std::fmt::Display for BinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
