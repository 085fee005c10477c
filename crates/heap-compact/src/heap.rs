//! The heap seam used by compaction.
//!
//! Compaction bookkeeping does not own memory. It reads and writes slots, asks
//! which page an address lives on and asks for the payload size of an object,
//! all through [`MovingHeap`]. The collector that embeds this crate implements
//! the trait over its real pages.
//!
//! [`PagedHeap`] is a small word-addressed model of a paged heap with bump
//! allocation. It implements [`MovingHeap`] and can physically relocate
//! objects, which makes it suitable for tests, benchmarks and as a reference
//! for embedders.

use std::collections::BTreeMap;

use crate::address::Address;

// ============================================================================
// Constants
// ============================================================================

/// Size of each page in [`PagedHeap`].
pub const PAGE_SIZE: usize = 4096;

/// Mask for extracting the page-aligned part of an address.
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Address of the first page in [`PagedHeap`].
pub const HEAP_BASE: usize = 0x10_0000;

const WORDS_PER_PAGE: usize = PAGE_SIZE / Address::WORD;

// ============================================================================
// Page and arena identity
// ============================================================================

/// Identity of a heap page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub usize);

/// Identity of an arena (a group of pages allocating one kind of object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaId(pub usize);

/// The kind of objects an arena holds.
///
/// Only backing-store arenas are candidates for compaction; see
/// [`CompactionCoordinator::is_compacting_arena`](crate::CompactionCoordinator::is_compacting_arena).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    /// Ordinary objects. Never moved.
    #[default]
    Normal,
    /// Out-of-line vector backing stores.
    Vector,
    /// Inline-capacity vector backing stores.
    InlineVector,
    /// Hash table backing stores.
    HashTable,
    /// One object per page. Never moved.
    LargeObject,
}

/// What the heap knows about the page containing some address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageInfo {
    /// The page.
    pub id: PageId,
    /// The arena owning the page.
    pub arena: ArenaId,
    /// The kind of the owning arena.
    pub kind: ArenaKind,
}

impl PageInfo {
    /// Returns `true` if the page holds a single large object.
    #[must_use]
    pub fn is_large_object_page(&self) -> bool {
        self.kind == ArenaKind::LargeObject
    }
}

// ============================================================================
// MovingHeap
// ============================================================================

/// Memory access needed by compaction.
///
/// Slots are pointer-sized locations holding an [`Address`]. Implementations
/// may treat out-of-heap accesses as programming errors.
pub trait MovingHeap {
    /// Read the address stored in `slot`.
    fn read_slot(&self, slot: Address) -> Address;

    /// Store `value` into `slot`.
    fn write_slot(&mut self, slot: Address, value: Address);

    /// The page containing `address`, if it is a heap address.
    fn page_of(&self, address: Address) -> Option<PageInfo>;

    /// Payload size in bytes of the object starting at `object`.
    fn payload_size(&self, object: Address) -> usize;
}

// ============================================================================
// PagedHeap
// ============================================================================

#[derive(Debug)]
struct Page {
    arena: ArenaId,
    kind: ArenaKind,
    words: Box<[usize]>,
    /// Next free byte offset.
    bump: usize,
    /// Live objects, by payload offset, with their payload size.
    objects: BTreeMap<usize, usize>,
    /// Bytes vacated by objects relocated away from this page.
    holes: usize,
}

impl Page {
    fn new(arena: ArenaId, kind: ArenaKind) -> Self {
        Self {
            arena,
            kind,
            words: vec![0; WORDS_PER_PAGE].into_boxed_slice(),
            bump: 0,
            objects: BTreeMap::new(),
            holes: 0,
        }
    }
}

/// A simulated paged heap with word-sized slots.
///
/// Pages are laid out contiguously from [`HEAP_BASE`]. Allocation bumps
/// through a page; relocation copies an object's payload to another page and
/// leaves a hole behind, which is reported by [`PagedHeap::free_list_bytes`].
///
/// # Example
///
/// ```
/// use heap_compact::heap::{ArenaId, ArenaKind, MovingHeap, PagedHeap};
///
/// let mut heap = PagedHeap::new();
/// let page = heap.add_page(ArenaId(0), ArenaKind::HashTable);
/// let object = heap.allocate(page, 32).unwrap();
/// heap.write_slot(object, object);
///
/// let to = heap.add_page(ArenaId(0), ArenaKind::HashTable);
/// let moved = heap.relocate(object, to).unwrap();
/// assert_eq!(heap.read_slot(moved), object);
/// assert_eq!(heap.payload_size(moved), 32);
/// ```
#[derive(Debug, Default)]
pub struct PagedHeap {
    pages: Vec<Option<Page>>,
}

impl PagedHeap {
    /// Create an empty heap.
    #[must_use]
    pub const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Map a fresh page for `arena`.
    pub fn add_page(&mut self, arena: ArenaId, kind: ArenaKind) -> PageId {
        self.pages.push(Some(Page::new(arena, kind)));
        PageId(self.pages.len() - 1)
    }

    /// Unmap `page`. Returns the number of bytes that were in use on it,
    /// holes included, or `None` if the page was not mapped.
    pub fn free_page(&mut self, page: PageId) -> Option<usize> {
        let freed = self.pages.get_mut(page.0)?.take()?;
        Some(freed.bump)
    }

    /// First byte of `page`.
    #[must_use]
    pub const fn page_start(page: PageId) -> Address {
        Address::new(HEAP_BASE + page.0 * PAGE_SIZE)
    }

    /// Number of pages ever mapped, including unmapped ones.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All mapped pages of `arena`.
    #[must_use]
    pub fn pages_in(&self, arena: ArenaId) -> Vec<PageId> {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().filter(|p| p.arena == arena).map(|_| PageId(i)))
            .collect()
    }

    /// Bump-allocate `bytes` (rounded up to a word) on `page`.
    ///
    /// Large-object pages accept exactly one object.
    pub fn allocate(&mut self, page: PageId, bytes: usize) -> Option<Address> {
        let size = bytes.max(1).checked_next_multiple_of(Address::WORD)?;
        let p = self.page_mut(page)?;
        if p.kind == ArenaKind::LargeObject && !p.objects.is_empty() {
            return None;
        }
        let offset = p.bump;
        if size > PAGE_SIZE - offset {
            return None;
        }
        p.bump += size;
        p.objects.insert(offset, size);
        Some(Self::page_start(page) + offset)
    }

    /// Copy the object at `object` to fresh space on `to_page`.
    ///
    /// The old location is forgotten and its bytes are counted as a hole.
    /// Returns the new address, or `None` if `object` is unknown or `to_page`
    /// has no room.
    pub fn relocate(&mut self, object: Address, to_page: PageId) -> Option<Address> {
        let (from_page, offset) = self.locate(object)?;
        let size = *self.pages[from_page.0].as_ref()?.objects.get(&offset)?;
        let to = self.allocate(to_page, size)?;

        let first = offset / Address::WORD;
        let payload: Vec<usize> = self.pages[from_page.0].as_ref()?.words
            [first..first + size / Address::WORD]
            .to_vec();
        let (_, to_offset) = self.locate(to)?;
        let dest = self.page_mut(to_page)?;
        let dest_first = to_offset / Address::WORD;
        dest.words[dest_first..dest_first + payload.len()].copy_from_slice(&payload);

        let source = self.page_mut(from_page)?;
        source.objects.remove(&offset);
        source.holes += size;
        Some(to)
    }

    /// Live objects on `page`, in address order.
    #[must_use]
    pub fn objects_on(&self, page: PageId) -> Vec<Address> {
        self.pages
            .get(page.0)
            .and_then(Option::as_ref)
            .map(|p| {
                p.objects
                    .keys()
                    .map(|&offset| Self::page_start(page) + offset)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Start of the live object whose payload contains `address`.
    #[must_use]
    pub fn object_containing(&self, address: Address) -> Option<Address> {
        let (page, offset) = self.locate(address)?;
        let p = self.pages[page.0].as_ref()?;
        let (&start, &size) = p.objects.range(..=offset).next_back()?;
        (offset < start + size).then(|| Self::page_start(page) + start)
    }

    /// Bytes vacated by relocation across all mapped pages.
    #[must_use]
    pub fn free_list_bytes(&self) -> usize {
        self.pages.iter().flatten().map(|p| p.holes).sum()
    }

    fn page_mut(&mut self, page: PageId) -> Option<&mut Page> {
        self.pages.get_mut(page.0)?.as_mut()
    }

    fn locate(&self, address: Address) -> Option<(PageId, usize)> {
        let offset = address.offset_from(Address::new(HEAP_BASE))?;
        let index = offset / PAGE_SIZE;
        self.pages.get(index)?.as_ref()?;
        Some((PageId(index), address.get() & !PAGE_MASK))
    }

    fn word(&self, slot: Address) -> Option<(PageId, usize)> {
        debug_assert!(slot.is_word_aligned(), "unaligned slot {slot}");
        let (page, offset) = self.locate(slot)?;
        Some((page, offset / Address::WORD))
    }
}

impl MovingHeap for PagedHeap {
    fn read_slot(&self, slot: Address) -> Address {
        self.word(slot)
            .and_then(|(page, index)| self.pages[page.0].as_ref().map(|p| p.words[index]))
            .map_or(Address::NULL, Address::new)
    }

    fn write_slot(&mut self, slot: Address, value: Address) {
        let located = self.word(slot);
        debug_assert!(located.is_some(), "write to unmapped slot {slot}");
        if let Some((page, index)) = located {
            if let Some(p) = self.page_mut(page) {
                p.words[index] = value.get();
            }
        }
    }

    fn page_of(&self, address: Address) -> Option<PageInfo> {
        let (page, _) = self.locate(address)?;
        let p = self.pages[page.0].as_ref()?;
        Some(PageInfo {
            id: page,
            arena: p.arena,
            kind: p.kind,
        })
    }

    fn payload_size(&self, object: Address) -> usize {
        self.locate(object)
            .and_then(|(page, offset)| {
                self.pages[page.0]
                    .as_ref()
                    .and_then(|p| p.objects.get(&offset).copied())
            })
            .unwrap_or(0)
    }
}
