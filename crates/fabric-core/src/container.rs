//! Container requests and the shared handles the master passes around.

use crate::definitions::BinStatus;
use crate::size::SizeVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Length of a worker-assigned container id.
const SHORT_ID_LEN: usize = 12;

/// Errors produced when validating a worker-assigned container id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShortIdError {
    /// The id did not have exactly twelve characters.
    #[error("expected {SHORT_ID_LEN} characters, got {0}")]
    BadLength(usize),
    /// The id contained a character outside the hex alphabet.
    #[error("non-hex character {0:?}")]
    BadCharacter(char),
}

/// A worker-assigned container id: the first twelve hex characters of the
/// container runtime's full id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(String);

impl ShortId {
    /// Validates and wraps a raw id as returned in a start-RPC response body.
    pub fn parse(raw: &str) -> Result<Self, ShortIdError> {
        let raw = raw.trim();
        if raw.len() != SHORT_ID_LEN {
            return Err(ShortIdError::BadLength(raw.len()));
        }
        if let Some(bad) = raw.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ShortIdError::BadCharacter(bad));
        }
        Ok(Self(raw.to_owned()))
    }

    /// The id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShortId {
    type Err = ShortIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A request for one container instance of a streaming-operator image.
///
/// The known fields are typed; anything else a worker or data source reports
/// rides along in the `extra` map so update-by-field-name semantics survive
/// serialization round trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRequest {
    /// Image to instantiate.
    #[serde(rename = "c_name")]
    pub image_name: String,
    /// Worker-assigned id, present once the container is running.
    #[serde(rename = "c_sid", default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<ShortId>,
    /// Index of the bin this request is placed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_index: Option<usize>,
    /// Placement lifecycle tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_status: Option<BinStatus>,
    /// Estimated resource usage per size descriptor.
    #[serde(default, skip_serializing_if = "SizeVector::is_empty")]
    pub size_data: SizeVector,
    /// Relative CPU share handed to the worker's container runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_share: Option<f64>,
    /// Open-ended worker-reported telemetry.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ContainerRequest {
    /// Creates a bare request for `image_name`, the form the load predictor
    /// and external clients submit.
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            short_id: None,
            bin_index: None,
            bin_status: None,
            size_data: SizeVector::new(),
            cpu_share: None,
            extra: HashMap::new(),
        }
    }

    /// Builder-style helper setting one size descriptor.
    pub fn with_size(mut self, descriptor: &str, value: f64) -> Self {
        self.size_data.set(descriptor, value);
        self
    }

    /// Returns `true` once the container has been started on its worker.
    ///
    /// A running container's size data is frozen; the profiler must not
    /// rewrite it.
    pub fn is_running(&self) -> bool {
        self.bin_status == Some(BinStatus::Running)
    }

    /// Strips the placement fields, returning the request to its unpacked
    /// form.
    pub fn clear_placement(&mut self) {
        self.bin_index = None;
        self.bin_status = None;
    }
}

/// A container request shared between the container queue, the bin layout,
/// and the allocation queue.
///
/// All three locations hold the same instance, so the dispatcher's writes
/// (short id, `Running`) are visible everywhere without further plumbing.
#[derive(Debug, Clone)]
pub struct SharedContainer(Arc<Mutex<ContainerRequest>>);

impl SharedContainer {
    /// Wraps a request for shared ownership.
    pub fn new(request: ContainerRequest) -> Self {
        Self(Arc::new(Mutex::new(request)))
    }

    /// Locks the underlying request.
    ///
    /// A poisoned lock yields the inner data; a panic while holding a
    /// container lock leaves plain data that is still safe to read.
    pub fn lock(&self) -> MutexGuard<'_, ContainerRequest> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The image this request instantiates.
    pub fn image_name(&self) -> String {
        self.lock().image_name.clone()
    }

    /// The current placement lifecycle tag.
    pub fn status(&self) -> Option<BinStatus> {
        self.lock().bin_status
    }

    /// Returns `true` when both handles refer to the same request instance.
    pub fn ptr_eq(&self, other: &SharedContainer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<ContainerRequest> for SharedContainer {
    fn from(request: ContainerRequest) -> Self {
        Self::new(request)
    }
}

/// The profiler's per-image update payload: freshly aggregated size data and
/// the relative CPU share to hand to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSizeUpdate {
    /// Image the update applies to.
    #[serde(rename = "c_name")]
    pub image_name: String,
    /// Fleet-wide averaged size descriptors.
    pub size_data: SizeVector,
    /// Per-image CPU share, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_share: Option<f64>,
}

impl ImageSizeUpdate {
    /// Creates an update carrying the given size data.
    pub fn new(image_name: impl Into<String>, size_data: SizeVector) -> Self {
        Self {
            image_name: image_name.into(),
            size_data,
            cpu_share: None,
        }
    }
}
