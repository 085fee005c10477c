//! Per-pass slot fixup bookkeeping.
//!
//! During marking the collector registers every slot that references a movable
//! object. Once marking is done, objects are moved one at a time and
//! [`FixupTable::notify_object_moved`] patches the registered slot for each.
//!
//! A registered slot can itself live inside another movable object (a backing
//! store nested in a backing store). Such interior slots move along with their
//! containing object, so the table keeps a slot -> relocated-location map and
//! marks interior addresses in a [`SparseRangeIndex`]. Whichever of the two
//! objects moves first records what the other one will need:
//!
//! - the referenced object moves first: the slot is patched in place and the
//!   containing object's later move carries the patched value along;
//! - the containing object moves first: the slot's new location is recorded,
//!   and the referenced object's later move writes through it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::address::Address;
use crate::compact::sparse::SparseRangeIndex;
use crate::heap::{ArenaId, MovingHeap, PageId};

#[cfg(feature = "tracing")]
use crate::compact::tracing::{
    log_interior_fixup, log_interior_mapping, log_redirected_slot, log_stale_slot,
};

/// Hook invoked after an object has moved and its slot has been patched.
///
/// Arguments are the heap, the old address, the new address and the moved
/// object's payload size. Objects with intra-object pointers use this to
/// rebase them; any extra context is captured by the closure.
pub type MoveCallback = Box<dyn FnMut(&mut dyn MovingHeap, Address, Address, usize) + Send>;

/// Slot fixups recorded for one compaction pass.
#[derive(Default)]
pub struct FixupTable {
    /// Movable object -> the slot referencing it.
    fixups: HashMap<Address, Address>,
    /// Movable object -> post-move hook.
    callbacks: HashMap<Address, MoveCallback>,
    /// Interior slot -> relocated location, unset until known.
    interior_fixups: HashMap<Address, Option<Address>>,
    compactable_pages: HashSet<PageId>,
    interiors: Option<SparseRangeIndex>,
    /// Arena -> referenced object -> slots outside any compactable page.
    external_relocations: HashMap<ArenaId, HashMap<Address, Vec<Address>>>,
    /// Old -> new address of every tracked object moved so far.
    relocated: HashMap<Address, Address>,
    objects_relocated: usize,
}

impl FixupTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `page` as holding objects that may move this pass.
    pub fn add_compactable_page(&mut self, page: PageId) {
        self.compactable_pages.insert(page);
    }

    /// Returns `true` if `page` was added with [`FixupTable::add_compactable_page`].
    #[must_use]
    pub fn is_compactable_page(&self, page: PageId) -> bool {
        self.compactable_pages.contains(&page)
    }

    /// Number of tracked objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    /// Returns `true` if no object is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    /// Number of interior slots.
    #[must_use]
    pub fn interior_len(&self) -> usize {
        self.interior_fixups.len()
    }

    /// Returns `true` once any interior slot has been registered.
    #[must_use]
    pub const fn has_interior(&self) -> bool {
        self.interiors.is_some()
    }

    /// The slot registered for `object`.
    #[must_use]
    pub fn slot_for(&self, object: Address) -> Option<Address> {
        self.fixups.get(&object).copied()
    }

    /// Returns `true` if `slot` is registered as an interior slot.
    #[must_use]
    pub fn is_interior_slot(&self, slot: Address) -> bool {
        self.interior_fixups.contains_key(&slot)
    }

    /// The relocated location recorded for interior `slot`, once known.
    #[must_use]
    pub fn interior_fixup(&self, slot: Address) -> Option<Address> {
        self.interior_fixups.get(&slot).copied().flatten()
    }

    /// Number of successful slot updates performed by this table.
    #[must_use]
    pub const fn objects_relocated(&self) -> usize {
        self.objects_relocated
    }

    /// Register `slot` as referencing a movable object.
    ///
    /// The object is whatever `slot` holds now. Null slots and objects on
    /// large-object pages are ignored. A slot that lives on a compactable
    /// page is also tracked as an interior slot. A later registration for the
    /// same object replaces the slot recorded for it.
    pub fn register_slot(&mut self, heap: &dyn MovingHeap, slot: Address) {
        let object = heap.read_slot(slot);
        if object.is_null() {
            return;
        }
        // Nothing to compact on a large object's page.
        if heap
            .page_of(object)
            .is_none_or(|page| page.is_large_object_page())
        {
            return;
        }
        if self.fixups.get(&object) == Some(&slot) {
            return;
        }

        if let Some(slot_page) = heap.page_of(slot) {
            if self.compactable_pages.contains(&slot_page.id)
                && !slot_page.is_large_object_page()
                && !self.interior_fixups.contains_key(&slot)
            {
                self.register_interior_slot(slot, slot);
            }
        }
        self.fixups.insert(object, slot);
    }

    /// Register `slot` as an interior slot whose location is `interior`.
    ///
    /// Registering the same slot twice is a caller bug.
    pub fn register_interior_slot(&mut self, interior: Address, slot: Address) {
        debug_assert!(
            !self.interior_fixups.contains_key(&slot),
            "interior slot {slot} registered twice"
        );
        if self.interior_fixups.contains_key(&slot) {
            return;
        }
        self.interior_fixups.insert(slot, None);
        self.add_interior_mapping(interior);
    }

    /// Register `callback` to run once `object` has moved.
    ///
    /// Registering a second callback for the same object is a caller bug;
    /// the first one is kept.
    pub fn register_move_callback(&mut self, object: Address, callback: MoveCallback) {
        debug_assert!(
            !self.callbacks.contains_key(&object),
            "move callback for {object} registered twice"
        );
        self.callbacks.entry(object).or_insert(callback);
    }

    /// Register a slot outside the compactable pages that references a
    /// movable object.
    ///
    /// Such slots are patched in bulk by
    /// [`FixupTable::fixup_cross_region_relocations`] once the arena owning
    /// the referenced object has been compacted. If the referenced address is
    /// not a tracked object it is assumed to point into one, and is tracked as
    /// an interior address.
    pub fn register_cross_region_relocation(&mut self, heap: &dyn MovingHeap, slot: Address) {
        let object = heap.read_slot(slot);
        if object.is_null() {
            return;
        }
        let page = heap.page_of(object);
        debug_assert!(page.is_some(), "relocation {slot} references non-heap {object}");
        let Some(page) = page else {
            return;
        };
        debug_assert!(!page.is_large_object_page());
        debug_assert!(self.compactable_pages.contains(&page.id));

        if !self.fixups.contains_key(&object) && !self.interior_fixups.contains_key(&object) {
            self.register_interior_slot(object, object);
        }

        self.external_relocations
            .entry(page.arena)
            .or_default()
            .entry(object)
            .or_default()
            .push(slot);
    }

    /// Patch the slot registered for `from` now that the object lives at `to`.
    ///
    /// If the slot no longer holds `from`, the slot's owner has changed it
    /// since registration (weak processing, a prefinalizer resizing a
    /// collection) and it is left untouched.
    pub fn notify_object_moved(&mut self, heap: &mut dyn MovingHeap, from: Address, to: Address) {
        let recorded = self.fixups.get(&from).copied();
        debug_assert!(recorded.is_some(), "untracked object {from} moved");
        let Some(mut slot) = recorded else {
            return;
        };
        self.relocated.insert(from, to);

        if let Some(entry) = self.interior_fixups.get_mut(&slot) {
            match *entry {
                // The containing object has not moved yet; it will carry the
                // patched slot along.
                None => *entry = Some(to),
                Some(relocated) => {
                    #[cfg(feature = "tracing")]
                    log_redirected_slot(slot, relocated);
                    slot = relocated;
                }
            }
        }

        let contents = heap.read_slot(slot);
        if contents != from {
            #[cfg(feature = "tracing")]
            log_stale_slot(slot, contents, from, to);
            return;
        }
        heap.write_slot(slot, to);
        self.objects_relocated += 1;

        let size = heap.payload_size(to);
        if let Some(callback) = self.callbacks.get_mut(&from) {
            callback(heap, from, to, size);
        }

        if self.interiors.is_some() {
            self.relocate_interior_fixups(from, to, size);
        }
    }

    /// Record the new location of every unset interior slot inside the
    /// object moved from `from` to `to`.
    pub fn relocate_interior_fixups(&mut self, from: Address, to: Address, size: usize) {
        let Some(interiors) = &self.interiors else {
            return;
        };
        let Some(range) = interiors.has_range(from, size) else {
            return;
        };

        for offset in (0..size).step_by(Address::WORD) {
            let interior = from + offset;
            if !range.is_set(interior) {
                continue;
            }
            let Some(entry) = self.interior_fixups.get_mut(&interior) else {
                continue;
            };
            // Already adjusted by an earlier move.
            if entry.is_some() {
                continue;
            }
            #[cfg(feature = "tracing")]
            log_interior_fixup(interior, to + offset);
            *entry = Some(to + offset);
        }
    }

    /// Write the final address of every object in `arena` referenced by a
    /// cross-region slot into those slots.
    pub fn fixup_cross_region_relocations(&mut self, heap: &mut dyn MovingHeap, arena: ArenaId) {
        let Some(per_arena) = self.external_relocations.remove(&arena) else {
            return;
        };
        for (object, slots) in per_arena {
            let resolved = if self.fixups.contains_key(&object) {
                self.relocated.get(&object).copied()
            } else {
                // Moved as part of its containing object.
                let entry = self.interior_fixups.get(&object);
                debug_assert!(entry.is_some(), "unresolvable relocation target {object}");
                entry.copied().flatten()
            };
            // Not moved this pass; the slots are still valid.
            let Some(resolved) = resolved else {
                continue;
            };
            for slot in slots {
                heap.write_slot(slot, resolved);
            }
        }
    }

    fn add_interior_mapping(&mut self, interior: Address) {
        #[cfg(feature = "tracing")]
        log_interior_mapping(interior);
        match self.interiors.as_mut() {
            Some(interiors) => interiors.add(interior),
            None => self.interiors = Some(SparseRangeIndex::new(interior)),
        }
    }
}

impl fmt::Debug for FixupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixupTable")
            .field("fixups", &self.fixups.len())
            .field("callbacks", &self.callbacks.len())
            .field("interior_fixups", &self.interior_fixups.len())
            .field("compactable_pages", &self.compactable_pages.len())
            .field("external_relocations", &self.external_relocations.len())
            .finish_non_exhaustive()
    }
}
