//! Multi-dimensional first-fit placement.
//!
//! The algorithm is deliberately simple: walk the bins in ascending index
//! order and take the first one that fits under the margin rule, creating a
//! new bin at the end of the layout when none does. That trades packing
//! density for O(bins · items) placement and stable bin identities across
//! repackings, which matters because the worker ↔ bin mapping is by index.

use crate::bin::Bin;
use crate::container::SharedContainer;
use tracing::trace;

/// Result of one packing pass.
#[derive(Debug)]
pub struct PackOutcome {
    /// The new layout: a superset of the input's bins, ordered by ascending
    /// index.
    pub bins: Vec<Bin>,
    /// Requests no bin could hold. With size fractions clamped into `[0, 1]`
    /// a freshly created bin always admits its item, so this is empty unless
    /// the accounting has been corrupted upstream.
    pub rejected: Vec<SharedContainer>,
}

/// Packs `input` into `bin_layout` with first-fit, returning the new layout.
///
/// Existing bins are never removed and keep their indices; new bins are
/// created with `index == bins.len()` at creation time. Items are processed
/// in the given order, so FIFO order at the call site is preserved and the
/// result is deterministic for identical arguments.
///
/// The safety `margin` applies only when probing existing bins; a bin
/// created for an item admits it on capacity alone, since it was created
/// expressly because nothing else fit.
pub fn first_fit<S: AsRef<str>>(
    input: Vec<SharedContainer>,
    bin_layout: Vec<Bin>,
    descriptors: &[S],
    margin: f64,
) -> PackOutcome {
    let mut bins = bin_layout;
    bins.sort_by_key(Bin::index);

    let mut rejected = Vec::new();
    for container in input {
        if bins.iter_mut().any(|bin| bin.pack(&container)) {
            continue;
        }
        let mut bin = Bin::new(bins.len(), descriptors, margin);
        if bin.pack_within_capacity(&container) {
            trace!(index = bin.index(), "opened new bin");
            bins.push(bin);
        } else {
            rejected.push(container);
        }
    }

    PackOutcome { bins, rejected }
}
