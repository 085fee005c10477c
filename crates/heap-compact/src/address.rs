//! Heap addresses.
//!
//! The compaction bookkeeping never dereferences memory itself. Every location
//! it deals with (an object, a slot holding a reference, an interior slot inside
//! another object's payload) is an [`Address`]: an opaque, totally ordered byte
//! offset into the moving heap. Reads and writes go through
//! [`MovingHeap`](crate::heap::MovingHeap).

use std::fmt;
use std::ops::{Add, Sub};

/// A byte location in a moving heap.
///
/// # Example
///
/// ```
/// use heap_compact::Address;
///
/// let a = Address::new(0x1000);
/// assert_eq!(a + 8, Address::new(0x1008));
/// assert_eq!((a + 8).offset_from(a), Some(8));
/// assert_eq!(a.checked_sub(0x2000), None);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    /// The null address. Slots holding it reference nothing.
    pub const NULL: Self = Self(0);

    /// Width of a slot in bytes.
    pub const WORD: usize = std::mem::size_of::<usize>();

    /// Create an address from a raw byte offset.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw byte offset.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Returns `true` for [`Address::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `self + bytes`, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// `self - bytes`, or `None` on underflow.
    #[must_use]
    pub const fn checked_sub(self, bytes: usize) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// `self - bytes`, clamped at [`Address::NULL`].
    #[must_use]
    pub const fn saturating_sub(self, bytes: usize) -> Self {
        Self(self.0.saturating_sub(bytes))
    }

    /// Distance in bytes from `base` up to `self`, or `None` if `self < base`.
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<usize> {
        self.0.checked_sub(base.0)
    }

    /// Returns `true` if `self` is a multiple of [`Address::WORD`].
    #[must_use]
    pub const fn is_word_aligned(self) -> bool {
        self.0 % Self::WORD == 0
    }
}

impl Add<usize> for Address {
    type Output = Self;

    fn add(self, bytes: usize) -> Self {
        self.checked_add(bytes)
            .unwrap_or_else(|| panic!("address overflow: {self:?} + {bytes:#x}"))
    }
}

impl Sub<usize> for Address {
    type Output = Self;

    fn sub(self, bytes: usize) -> Self {
        self.checked_sub(bytes)
            .unwrap_or_else(|| panic!("address underflow: {self:?} - {bytes:#x}"))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}
