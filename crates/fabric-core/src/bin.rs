//! Bins: per-worker capacity slots tracking multi-dimensional free space.
//!
//! A `Bin` is the unit the packing algorithm fills. Its index doubles as the
//! worker assignment: the worker registered with the same index runs every
//! container packed here. Free space is tracked per size descriptor and kept
//! in `[0, 1]` after every mutation.

use crate::container::{ImageSizeUpdate, SharedContainer, ShortId};
use crate::definitions::BinStatus;
use crate::size::SizeVector;
use serde::Serialize;

/// A container request bound to a bin, together with the size snapshot the
/// placement was computed from.
///
/// Constructed when packing attempts a placement; discarded without side
/// effect when the bin rejects, retained on success. The snapshot only
/// changes through [`Bin::update_items`], so free-space accounting and item
/// sizes never drift apart.
#[derive(Debug, Clone)]
pub struct Item {
    container: SharedContainer,
    size: SizeVector,
}

impl Item {
    /// The shared request this item places.
    pub fn container(&self) -> &SharedContainer {
        &self.container
    }

    /// The size snapshot deducted from the bin's free space.
    pub fn size(&self) -> &SizeVector {
        &self.size
    }
}

/// Comparable value view of an [`Item`] for tests, logs, and operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSnapshot {
    pub image_name: String,
    pub size: SizeVector,
    pub bin_status: Option<BinStatus>,
    pub short_id: Option<ShortId>,
}

/// Comparable value view of a [`Bin`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinSnapshot {
    pub index: usize,
    pub free_space: SizeVector,
    pub items: Vec<ItemSnapshot>,
}

/// One worker's worth of capacity, tracked per size descriptor.
#[derive(Debug, Clone)]
pub struct Bin {
    index: usize,
    free_space: SizeVector,
    space_margin: SizeVector,
    items: Vec<Item>,
}

impl Bin {
    /// Creates an empty bin.
    ///
    /// `index` must equal the bin's position in the ordered layout at
    /// creation time; the packing algorithm is the only intended caller.
    /// `margin` is the per-descriptor safety margin withheld from packing
    /// decisions (0.0 disables it).
    pub fn new<S: AsRef<str>>(index: usize, descriptors: &[S], margin: f64) -> Self {
        Self {
            index,
            free_space: SizeVector::uniform(descriptors, 1.0),
            space_margin: SizeVector::uniform(descriptors, margin),
            items: Vec::new(),
        }
    }

    /// The bin's position in the layout, and the worker it maps to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Remaining capacity per tracked descriptor.
    pub fn free_space(&self) -> &SizeVector {
        &self.free_space
    }

    /// Safety margin withheld per tracked descriptor.
    pub fn space_margin(&self) -> &SizeVector {
        &self.space_margin
    }

    /// Items currently placed in this bin.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of items currently placed in this bin.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when no item is placed here.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Attempts to place a request under the margin rule: accepted iff for
    /// every tracked descriptor `size < free_space − margin` (strict).
    ///
    /// On success the request's `bin_index`/`bin_status` are written, the
    /// size is deducted, and the item is appended. On rejection the bin is
    /// untouched.
    pub fn pack(&mut self, container: &SharedContainer) -> bool {
        let size = container.lock().size_data.clone();
        let fits = self.free_space.iter().all(|(descriptor, free)| {
            size.fraction(descriptor) < free - self.space_margin.fraction(descriptor)
        });
        if fits {
            self.place(container.clone(), size);
        }
        fits
    }

    /// Attempts to place a request checking capacity only, ignoring the
    /// margin. Used for freshly created bins, where the margin would
    /// otherwise reject items the bin was created for.
    pub fn pack_within_capacity(&mut self, container: &SharedContainer) -> bool {
        let size = container.lock().size_data.clone();
        let fits = self
            .free_space
            .iter()
            .all(|(descriptor, free)| size.fraction(descriptor) <= free);
        if fits {
            self.place(container.clone(), size);
        }
        fits
    }

    fn place(&mut self, container: SharedContainer, size: SizeVector) {
        {
            let mut request = container.lock();
            request.bin_index = Some(self.index);
            request.bin_status = Some(BinStatus::Packed);
        }
        self.free_space.deduct(&size);
        self.items.push(Item { container, size });
        debug_assert!(
            self.free_space_in_range(),
            "bin {} free space left [0, 1] after place",
            self.index
        );
    }

    /// Removes the first item whose request carries `short_id`, returning its
    /// size to free space and stripping the placement fields.
    ///
    /// Returns `false` with no state change when the id is unknown here.
    pub fn remove_by_short_id(&mut self, short_id: &ShortId) -> bool {
        let position = self
            .items
            .iter()
            .position(|item| item.container.lock().short_id.as_ref() == Some(short_id));
        let Some(position) = position else {
            return false;
        };
        let item = self.items.remove(position);
        self.free_space.restore(item.size());
        item.container.lock().clear_placement();
        debug_assert!(
            self.free_space_in_range(),
            "bin {} free space left [0, 1] after removal",
            self.index
        );
        true
    }

    /// Rewrites the size data of every item matching the update's image whose
    /// status is not `Running`.
    ///
    /// Per tracked descriptor: the old size is released, the new value
    /// written through to both the snapshot and the request, then re-deducted
    /// with clamping. Running items are skipped entirely so a live
    /// container's fluctuating telemetry cannot destabilize the packing.
    /// Returns the number of items rewritten.
    pub fn update_items(&mut self, update: &ImageSizeUpdate) -> usize {
        let mut touched = 0;
        for item in &mut self.items {
            let mut request = item.container.lock();
            if request.image_name != update.image_name || request.is_running() {
                continue;
            }
            let descriptors: Vec<String> =
                self.free_space.descriptors().map(str::to_owned).collect();
            for descriptor in &descriptors {
                let Some(new_size) = update.size_data.get(descriptor) else {
                    continue;
                };
                let old_size = item.size.fraction(descriptor);
                self.free_space
                    .set(descriptor, self.free_space.fraction(descriptor) + old_size);
                item.size.set(descriptor, new_size);
                request.size_data.set(descriptor, new_size);
                self.free_space.set(
                    descriptor,
                    self.free_space.fraction(descriptor) - item.size.fraction(descriptor),
                );
            }
            if let Some(cpu_share) = update.cpu_share {
                request.cpu_share = Some(cpu_share);
            }
            touched += 1;
        }
        touched
    }

    /// Drains every item out of the bin, restoring its full capacity.
    ///
    /// Used when the owning worker disappears and its containers must be
    /// placed elsewhere; placement fields are left to the caller.
    pub fn drain_items(&mut self) -> Vec<Item> {
        let items = std::mem::take(&mut self.items);
        for item in &items {
            self.free_space.restore(item.size());
        }
        items
    }

    /// Total placed load for one descriptor, summed over the item snapshots.
    pub fn tracked_load(&self, descriptor: &str) -> f64 {
        self.items
            .iter()
            .map(|item| item.size.fraction(descriptor))
            .sum()
    }

    fn free_space_in_range(&self) -> bool {
        self.free_space
            .iter()
            .all(|(_, free)| (0.0..=1.0).contains(&free))
    }

    /// Comparable value view of the bin's current state.
    pub fn snapshot(&self) -> BinSnapshot {
        BinSnapshot {
            index: self.index,
            free_space: self.free_space.clone(),
            items: self
                .items
                .iter()
                .map(|item| {
                    let request = item.container.lock();
                    ItemSnapshot {
                        image_name: request.image_name.clone(),
                        size: item.size.clone(),
                        bin_status: request.bin_status,
                        short_id: request.short_id.clone(),
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerRequest;
    use crate::definitions::{AVG_CPU, AVG_MEMORY};

    const EPS: f64 = 1e-9;

    fn request(image: &str, cpu: f64) -> SharedContainer {
        SharedContainer::new(ContainerRequest::new(image).with_size(AVG_CPU, cpu))
    }

    #[test]
    fn pack_deducts_and_tags_the_request() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        let container = request("img/a", 0.3);

        assert!(bin.pack(&container));
        assert!((bin.free_space().fraction(AVG_CPU) - 0.7).abs() < EPS);
        let guard = container.lock();
        assert_eq!(guard.bin_index, Some(0));
        assert_eq!(guard.bin_status, Some(BinStatus::Packed));
    }

    #[test]
    fn pack_enforces_the_strict_margin_rule() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        // 0.95 < 1.0 - 0.05 is false: rejected, bin untouched.
        assert!(!bin.pack(&request("img/a", 0.95)));
        assert!(bin.is_empty());
        assert_eq!(bin.free_space().fraction(AVG_CPU), 1.0);

        // The capacity-only rule admits the same item.
        assert!(bin.pack_within_capacity(&request("img/a", 0.95)));
        assert_eq!(bin.len(), 1);
    }

    #[test]
    fn pack_checks_every_tracked_descriptor() {
        let mut bin = Bin::new(0, &[AVG_CPU, AVG_MEMORY], 0.0);
        let container = SharedContainer::new(
            ContainerRequest::new("img/a")
                .with_size(AVG_CPU, 0.2)
                .with_size(AVG_MEMORY, 1.0),
        );
        assert!(!bin.pack(&container));
        assert_eq!(bin.free_space().fraction(AVG_MEMORY), 1.0);
    }

    #[test]
    fn removal_reclaims_capacity_and_strips_placement() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        let container = request("img/a", 0.4);
        assert!(bin.pack(&container));
        container.lock().short_id = Some(ShortId::parse("aabbccddeeff").unwrap());

        let sid = ShortId::parse("aabbccddeeff").unwrap();
        assert!(bin.remove_by_short_id(&sid));
        assert!(bin.is_empty());
        assert!((bin.free_space().fraction(AVG_CPU) - 1.0).abs() < EPS);
        let guard = container.lock();
        assert_eq!(guard.bin_index, None);
        assert_eq!(guard.bin_status, None);

        // A second removal finds nothing and changes nothing.
        drop(guard);
        assert!(!bin.remove_by_short_id(&sid));
    }

    #[test]
    fn update_rewrites_pending_items() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        let container = request("img/a", 0.3);
        assert!(bin.pack(&container));

        let update = ImageSizeUpdate::new(
            "img/a",
            [(AVG_CPU, 0.5)].into_iter().collect::<SizeVector>(),
        );
        assert_eq!(bin.update_items(&update), 1);
        assert!((bin.free_space().fraction(AVG_CPU) - 0.5).abs() < EPS);
        assert_eq!(container.lock().size_data.fraction(AVG_CPU), 0.5);
    }

    #[test]
    fn update_skips_running_items() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        let container = request("img/a", 0.3);
        assert!(bin.pack(&container));
        container.lock().bin_status = Some(BinStatus::Running);
        let free_before = bin.free_space().fraction(AVG_CPU);

        let update = ImageSizeUpdate::new(
            "img/a",
            [(AVG_CPU, 0.8)].into_iter().collect::<SizeVector>(),
        );
        assert_eq!(bin.update_items(&update), 0);
        assert_eq!(bin.free_space().fraction(AVG_CPU), free_before);
        assert_eq!(container.lock().size_data.fraction(AVG_CPU), 0.3);
    }

    #[test]
    fn update_only_touches_matching_images() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.0);
        let a = request("img/a", 0.2);
        let b = request("img/b", 0.3);
        assert!(bin.pack(&a));
        assert!(bin.pack(&b));

        let update = ImageSizeUpdate::new(
            "img/a",
            [(AVG_CPU, 0.4)].into_iter().collect::<SizeVector>(),
        );
        assert_eq!(bin.update_items(&update), 1);
        assert_eq!(b.lock().size_data.fraction(AVG_CPU), 0.3);
        assert!((bin.free_space().fraction(AVG_CPU) - 0.3).abs() < EPS);
    }

    #[test]
    fn drain_restores_full_capacity() {
        let mut bin = Bin::new(3, &[AVG_CPU], 0.05);
        assert!(bin.pack(&request("img/a", 0.3)));
        assert!(bin.pack(&request("img/b", 0.4)));

        let items = bin.drain_items();
        assert_eq!(items.len(), 2);
        assert!(bin.is_empty());
        assert!((bin.free_space().fraction(AVG_CPU) - 1.0).abs() < EPS);
    }

    #[test]
    fn capacity_accounting_matches_tracked_load() {
        let mut bin = Bin::new(0, &[AVG_CPU], 0.05);
        assert!(bin.pack(&request("img/a", 0.25)));
        assert!(bin.pack(&request("img/b", 0.35)));
        let total = bin.free_space().fraction(AVG_CPU) + bin.tracked_load(AVG_CPU);
        assert!((total - 1.0).abs() < EPS);
    }
}
