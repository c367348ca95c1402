//! Error types for the dispatch path.

use fabric_core::ShortIdError;
use thiserror::Error;

/// Errors that can occur while starting a container on its worker.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The container was popped from the allocation queue without a bin
    /// index. Packing always writes one, so this indicates corruption
    /// upstream.
    #[error("container for image {0} has no bin index")]
    Unplaced(String),

    /// No registered worker owns the container's bin index.
    #[error("no worker registered for bin index {0}")]
    UnknownBinIndex(usize),

    /// The worker answered the start request with a non-success status.
    #[error("worker {address}:{port} rejected start request with status {status}")]
    Rejected {
        /// Worker node address.
        address: String,
        /// Worker node port.
        port: u16,
        /// HTTP status returned.
        status: u16,
    },

    /// The request never reached the worker or the response never arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The worker accepted the request but returned an id that does not
    /// look like a container short id.
    #[error("worker returned malformed container id: {0}")]
    MalformedShortId(#[from] ShortIdError),

    /// Every retry attempt failed.
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted {
        /// Total attempts made, including the initial one.
        attempts: u32,
    },
}

impl DispatchError {
    /// Returns `true` for failures where the container is known not to have
    /// started, making a retry safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Transport(_))
    }
}
