//! Deterministic placement core for the fabric master.
//!
//! This crate holds everything the resource manager computes placements
//! with, and nothing it runs them with: the shared wire vocabulary, the
//! container-request model, multi-dimensional size vectors, and the
//! first-fit bin-packing algorithm. There is no I/O and no async here:
//! given the same inputs, every function in this crate produces the same
//! output, which is what makes the packing testable in isolation and stable
//! under live mutation by the orchestration layer.
//!
//! # Overview
//!
//! - [`definitions`]: field names, size descriptors, and the
//!   [`BinStatus`] lifecycle shared across process boundaries.
//! - [`SizeVector`]: descriptor → capacity-fraction maps, clamped to
//!   `[0, 1]` on every write.
//! - [`ContainerRequest`] / [`SharedContainer`]: one requested container
//!   instance, shared between the container queue, the bin layout, and the
//!   allocation queue.
//! - [`Bin`] / [`Item`]: per-worker capacity slots and the placements held
//!   in them.
//! - [`first_fit`]: the packing pass itself.

pub mod bin;
pub mod container;
pub mod definitions;
pub mod packing;
pub mod size;

pub use bin::{Bin, BinSnapshot, Item, ItemSnapshot};
pub use container::{
    ContainerRequest, ImageSizeUpdate, SharedContainer, ShortId, ShortIdError,
};
pub use definitions::BinStatus;
pub use packing::{first_fit, PackOutcome};
pub use size::SizeVector;
