//! FIFO queue of containers awaiting their first packing.

use fabric_core::{ImageSizeUpdate, SharedContainer};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe FIFO of container requests the packing loop has not yet
/// placed.
///
/// A single lock protects every mutation, so a [`drain`](Self::drain) is
/// linearizable against concurrent [`put`](Self::put)s and
/// [`update_containers`](Self::update_containers) calls.
#[derive(Debug, Default)]
pub struct ContainerQueue {
    queue: Mutex<VecDeque<SharedContainer>>,
}

impl ContainerQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SharedContainer>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a request at the tail.
    pub fn put(&self, container: SharedContainer) {
        self.lock().push_back(container);
    }

    /// Atomically removes and returns every pending request in FIFO order.
    pub fn drain(&self) -> Vec<SharedContainer> {
        self.lock().drain(..).collect()
    }

    /// Returns `true` if any pending request targets `image`.
    pub fn contains_image(&self, image: &str) -> bool {
        self.lock()
            .iter()
            .any(|container| container.lock().image_name == image)
    }

    /// Overwrites the size data (and CPU share, when present) of every
    /// pending request targeting the update's image. Returns the number of
    /// requests rewritten.
    pub fn update_containers(&self, image: &str, update: &ImageSizeUpdate) -> usize {
        let queue = self.lock();
        let mut touched = 0;
        for container in queue.iter() {
            let mut request = container.lock();
            if request.image_name != image {
                continue;
            }
            request.size_data.merge_from(&update.size_data);
            if let Some(cpu_share) = update.cpu_share {
                request.cpu_share = Some(cpu_share);
            }
            touched += 1;
        }
        touched
    }

    /// Snapshot of the pending requests, head first.
    pub fn snapshot(&self) -> Vec<SharedContainer> {
        self.lock().iter().cloned().collect()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
