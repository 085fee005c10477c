//! Sparse address bitmap for interior slot lookup.
//!
//! Compaction has to find, for every object it moves, whether any registered
//! interior slot lives inside the object's payload. Such slots are rare and
//! tend to cluster, so a dense bitmap over the whole heap wastes memory while a
//! plain set cannot answer range queries.
//!
//! [`SparseRangeIndex`] is a binary tree of fixed-size chunks. Each node either
//! records a single address or owns a bitmap covering
//! `[base, base + MAX_RANGE)`. Lower addresses live in the left subtree,
//! higher ones in the right subtree. The tree is not rebalanced: insertion
//! order decides its shape, and addresses are expected to arrive mostly in
//! increasing order.
//!
//! Nodes are stored in a `Vec` and linked by index. Nodes are never removed;
//! the whole index is dropped at the end of a compaction pass.

use crate::address::Address;

/// Number of addresses covered by one bitmap node.
pub const MAX_RANGE: usize = 256;

const BITMAP_WORDS: usize = MAX_RANGE / 64;

const ROOT: NodeId = NodeId(0);

/// Index of a node inside a [`SparseRangeIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    base: Address,
    /// Either 1 or `MAX_RANGE`.
    size: usize,
    /// Present once the node tracks more than one address.
    bitmap: Option<Box<[u64; BITMAP_WORDS]>>,
    left: Option<NodeId>,
    right: Option<NodeId>,
}

impl Node {
    const fn single(base: Address) -> Self {
        Self {
            base,
            size: 1,
            bitmap: None,
            left: None,
            right: None,
        }
    }

    fn end(&self) -> Address {
        Address::new(self.base.get().saturating_add(self.size - 1))
    }

    /// `address` lies at or beyond `base + MAX_RANGE`.
    fn is_beyond(&self, address: Address) -> bool {
        address
            .offset_from(self.base)
            .is_some_and(|distance| distance >= MAX_RANGE)
    }

    /// Lowest address this node may absorb.
    ///
    /// A bitmap node cannot be left-extended, that would mean shifting its
    /// bits. A single-address node can take a new base up to
    /// `MAX_RANGE - 1` below its current one.
    fn min_start(&self) -> Address {
        if self.bitmap.is_some() {
            return self.base;
        }
        if self.base.get() > MAX_RANGE {
            self.base - (MAX_RANGE - 1)
        } else {
            Address::NULL
        }
    }

    fn create_bitmap(&mut self) {
        debug_assert!(self.bitmap.is_none() && self.size == 1);
        self.bitmap = Some(Box::new([0; BITMAP_WORDS]));
        self.size = MAX_RANGE;
        self.set(0);
    }

    fn set(&mut self, offset: usize) {
        if let Some(bitmap) = self.bitmap.as_mut() {
            bitmap[offset / 64] |= 1u64 << (offset % 64);
        }
    }

    /// `address` must lie within `[base, end]`.
    fn test(&self, address: Address) -> bool {
        match (&self.bitmap, address.offset_from(self.base)) {
            (Some(bitmap), Some(offset)) => (bitmap[offset / 64] >> (offset % 64)) & 1 != 0,
            (None, _) => self.size == 1,
            (Some(_), None) => false,
        }
    }
}

/// A sparse set of heap addresses supporting range lookups.
///
/// # Example
///
/// ```
/// use heap_compact::{Address, SparseRangeIndex};
///
/// let mut index = SparseRangeIndex::new(Address::new(0x1000));
/// index.add(Address::new(0x1010));
///
/// let range = index.has_range(Address::new(0x1008), 16).unwrap();
/// assert!(range.is_set(Address::new(0x1010)));
/// assert!(!range.is_set(Address::new(0x1008)));
/// assert!(index.has_range(Address::new(0x2000), 8).is_none());
/// ```
#[derive(Debug)]
pub struct SparseRangeIndex {
    nodes: Vec<Node>,
}

impl SparseRangeIndex {
    /// Number of addresses covered by one bitmap node.
    pub const MAX_RANGE: usize = MAX_RANGE;

    /// Create an index holding just `base`.
    #[must_use]
    pub fn new(base: Address) -> Self {
        Self {
            nodes: vec![Node::single(base)],
        }
    }

    /// Number of tree nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`; an index holds at least the address it was created with.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mark `address` as set.
    pub fn add(&mut self, address: Address) {
        let mut current = ROOT;
        loop {
            let node = &self.nodes[current.0];
            let (left, right) = (node.left, node.right);

            if node.is_beyond(address) {
                match right {
                    Some(right) => current = right,
                    None => {
                        let id = self.push(address);
                        self.nodes[current.0].right = Some(id);
                        return;
                    }
                }
                continue;
            }

            if address < node.min_start() {
                match left {
                    Some(left) => current = left,
                    None => {
                        let id = self.push(address);
                        self.nodes[current.0].left = Some(id);
                        return;
                    }
                }
                continue;
            }

            if address == node.base {
                return;
            }

            let node = &mut self.nodes[current.0];
            if address > node.base {
                if node.bitmap.is_none() {
                    node.create_bitmap();
                }
                if let Some(offset) = address.offset_from(node.base) {
                    node.set(offset);
                }
                return;
            }

            // Left extension: `address` becomes the new base.
            let old_base = std::mem::replace(&mut node.base, address);
            node.create_bitmap();
            if let Some(offset) = old_base.offset_from(address) {
                node.set(offset);
            }
            return;
        }
    }

    /// The subtree whose node range intersects `[address, address + size)`.
    ///
    /// The returned handle answers [`SubtreeRef::is_set`] for addresses in
    /// that range. Probing it for addresses outside the range gives an
    /// unspecified (but safe) answer.
    #[must_use]
    pub fn has_range(&self, address: Address, size: usize) -> Option<SubtreeRef<'_>> {
        let last = Address::new(address.get().saturating_add(size.saturating_sub(1)));
        let mut current = ROOT;
        loop {
            let node = &self.nodes[current.0];
            if address > node.end() {
                current = node.right?;
            } else if address >= node.base || last >= node.base {
                return Some(SubtreeRef {
                    index: self,
                    node: current,
                });
            } else {
                current = node.left?;
            }
        }
    }

    /// Returns `true` if `address` is set anywhere in the index.
    #[must_use]
    pub fn is_set(&self, address: Address) -> bool {
        self.is_set_from(ROOT, address)
    }

    fn is_set_from(&self, mut current: NodeId, address: Address) -> bool {
        loop {
            let node = &self.nodes[current.0];
            let next = if address > node.end() {
                node.right
            } else if address >= node.base {
                return node.test(address);
            } else {
                node.left
            };
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    fn push(&mut self, address: Address) -> NodeId {
        self.nodes.push(Node::single(address));
        NodeId(self.nodes.len() - 1)
    }
}

/// A subtree of a [`SparseRangeIndex`], as returned by
/// [`SparseRangeIndex::has_range`].
///
/// Two handles compare equal when they refer to the same node of the same
/// index.
#[derive(Debug, Clone, Copy)]
pub struct SubtreeRef<'a> {
    index: &'a SparseRangeIndex,
    node: NodeId,
}

impl SubtreeRef<'_> {
    /// Returns `true` if `address` is set in this subtree.
    #[must_use]
    pub fn is_set(&self, address: Address) -> bool {
        self.index.is_set_from(self.node, address)
    }

    /// The node this handle refers to.
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// First address covered by the node.
    #[must_use]
    pub fn base(&self) -> Address {
        self.index.nodes[self.node.0].base
    }

    /// Number of addresses covered by the node: 1 or `MAX_RANGE`.
    #[must_use]
    pub fn width(&self) -> usize {
        self.index.nodes[self.node.0].size
    }
}

impl PartialEq for SubtreeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.index, other.index) && self.node == other.node
    }
}

impl Eq for SubtreeRef<'_> {}
