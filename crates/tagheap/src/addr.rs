//! Arena-relative addresses.
//!
//! Every "address" handled by the allocator is a byte offset into the heap
//! arena, never a native pointer. Block headers and footers sit on 4-byte
//! boundaries and payloads on 8-byte boundaries.

use core::{
    fmt,
    ops::{Add, Sub},
};

macro_rules! impl_hex {
    ($ty:ty) => {
        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl fmt::UpperHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::UpperHex::fmt(&self.0, f)
            }
        }
    };
}

/// Rounds `x` up to the smallest multiple of `n` that is not less than `x`.
///
/// # Panics
///
/// Panics if `n` is zero or the result overflows `u32`.
///
/// # Examples
///
/// ```
/// use tagheap::round_up;
///
/// assert_eq!(round_up(13, 8), 16);
/// assert_eq!(round_up(16, 8), 16);
/// assert_eq!(round_up(0, 4096), 0);
/// ```
#[must_use]
pub const fn round_up(x: u32, n: u32) -> u32 {
    x.next_multiple_of(n)
}

/// Byte offset into the heap arena.
///
/// Offset `0` is never the address of a block: the first word of the arena
/// is permanently unused padding in front of the prologue, so a missing
/// block is spelled `Option<HeapAddr>::None` rather than a zero offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapAddr(u32);
impl_hex!(HeapAddr);

impl HeapAddr {
    /// Creates an address from a raw arena offset.
    #[must_use]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Returns the raw arena offset.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` if this address is a multiple of `align`.
    #[must_use]
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0.is_multiple_of(align)
    }

    /// Rounds this address up to a multiple of `n`.
    #[must_use]
    pub const fn round_up(self, n: u32) -> Self {
        Self(round_up(self.0, n))
    }

    /// Adds a byte count to this address.
    ///
    /// Returns `None` if the addition would overflow.
    #[must_use]
    pub const fn checked_add(self, bytes: u32) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Subtracts a byte count from this address.
    ///
    /// Returns `None` if the subtraction would underflow.
    #[must_use]
    pub const fn checked_sub(self, bytes: u32) -> Option<Self> {
        match self.0.checked_sub(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Display for HeapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u32> for HeapAddr {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        self.checked_add(rhs).unwrap()
    }
}

impl Sub<u32> for HeapAddr {
    type Output = Self;

    fn sub(self, rhs: u32) -> Self::Output {
        self.checked_sub(rhs).unwrap()
    }
}

impl Sub<Self> for HeapAddr {
    type Output = u32;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.checked_sub(rhs.0).unwrap()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        for i in 0..100 {
            for j in 1..=8 {
                let x = i * 8 + j;
                assert_eq!(round_up(x, 8), (i + 1) * 8);
            }
        }
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
    }

    #[test]
    fn test_addr_round_up_maps_header_to_payload() {
        assert_eq!(HeapAddr::new(12).round_up(8), HeapAddr::new(16));
        assert_eq!(HeapAddr::new(16).round_up(8), HeapAddr::new(16));
    }

    #[test]
    fn test_arithmetic() {
        let addr = HeapAddr::new(100);
        assert_eq!(addr + 4, HeapAddr::new(104));
        assert_eq!(addr - 4, HeapAddr::new(96));
        assert_eq!(HeapAddr::new(112) - addr, 12);
        assert_eq!(addr.checked_sub(101), None);
        assert_eq!(HeapAddr::new(u32::MAX).checked_add(1), None);
    }

    #[test]
    fn test_alignment() {
        assert!(HeapAddr::new(12).is_aligned(4));
        assert!(!HeapAddr::new(12).is_aligned(8));
        assert!(HeapAddr::new(16).is_aligned(8));
    }

    #[test]
    #[should_panic]
    fn test_sub_underflow_panics() {
        let _ = HeapAddr::new(2) - 4;
    }

    #[test]
    fn test_format() {
        let addr = HeapAddr::new(4092);
        assert_eq!(format!("{addr}"), "4092");
        assert_eq!(format!("{addr:#x}"), "0xffc");
    }
}
