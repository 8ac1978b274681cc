//! The byte arena backing the simulated heap.
//!
//! The arena owns a fixed-capacity buffer and two cursors delimiting the
//! region currently granted to the heap:
//!
//! ```text
//! 0          heap_start                     heap_end              capacity
//! │              │◄──────── granted ────────►│◄──── not granted ────►│
//! └──────────────┴───────────────────────────┴───────────────────────┘
//! ```
//!
//! `heap_start` is fixed at offset 0 and `heap_end` only moves in whole
//! pages. All word accesses are bounds-checked against the granted region.

use alloc::{boxed::Box, vec};
use core::fmt;

use dataview::DataView;

use crate::{
    addr::HeapAddr,
    config::{PAGE_SIZE, WORD_SIZE},
};

pub struct Arena {
    bytes: Box<[u8]>,
    capacity: u32,
    heap_start: HeapAddr,
    heap_end: HeapAddr,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("heap_start", &self.heap_start)
            .field("heap_end", &self.heap_end)
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Creates a zeroed arena with nothing granted yet.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            bytes: vec![0; capacity as usize].into_boxed_slice(),
            capacity,
            heap_start: HeapAddr::new(0),
            heap_end: HeapAddr::new(0),
        }
    }

    /// Returns the maximum number of bytes the heap may grow to.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the first byte of the granted region.
    #[must_use]
    pub fn heap_start(&self) -> HeapAddr {
        self.heap_start
    }

    /// Returns one past the last byte of the granted region.
    #[must_use]
    pub fn heap_end(&self) -> HeapAddr {
        self.heap_end
    }

    /// Returns the size of the granted region in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.heap_end - self.heap_start
    }

    /// Zeroes the whole arena and grants its first `initial` bytes.
    pub(crate) fn reset(&mut self, initial: u32) {
        assert!(
            initial <= self.capacity,
            "initial heap exceeds capacity: initial={initial}, capacity={}",
            self.capacity
        );
        self.bytes.fill(0);
        self.heap_end = self.heap_start + initial;
    }

    /// Grants `size` more bytes past `heap_end`.
    ///
    /// Returns the number of bytes granted, or `None` if the heap would
    /// exceed its capacity.
    pub(crate) fn grow(&mut self, size: u32) -> Option<u32> {
        debug_assert!(size.is_multiple_of(PAGE_SIZE));
        let new_size = self.size().checked_add(size)?;
        if new_size > self.capacity {
            return None;
        }
        self.heap_end = self.heap_end + size;
        Some(size)
    }

    /// Reads the little-endian word at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not 4-byte aligned or the word is not inside the
    /// granted region.
    pub(crate) fn read_word(&self, addr: HeapAddr) -> u32 {
        self.assert_word(addr);
        u32::from_le(DataView::from(&*self.bytes).read::<u32>(addr.index()))
    }

    /// Writes `value` as a little-endian word at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not 4-byte aligned or the word is not inside the
    /// granted region.
    pub(crate) fn write_word(&mut self, addr: HeapAddr, value: u32) {
        self.assert_word(addr);
        DataView::from_mut(&mut *self.bytes).write(addr.index(), &value.to_le());
    }

    /// Returns `len` granted bytes starting at `start`.
    pub(crate) fn bytes(&self, start: HeapAddr, len: u32) -> &[u8] {
        let end = self.assert_range(start, len);
        &self.bytes[start.index()..end.index()]
    }

    /// Returns `len` granted bytes starting at `start`, mutably.
    pub(crate) fn bytes_mut(&mut self, start: HeapAddr, len: u32) -> &mut [u8] {
        let end = self.assert_range(start, len);
        &mut self.bytes[start.index()..end.index()]
    }

    fn assert_word(&self, addr: HeapAddr) {
        assert!(
            addr.is_aligned(WORD_SIZE),
            "word address is not 4-byte aligned: addr={addr}"
        );
        self.assert_range(addr, WORD_SIZE);
    }

    fn assert_range(&self, start: HeapAddr, len: u32) -> HeapAddr {
        let end = start.checked_add(len);
        assert!(
            self.heap_start <= start && end.is_some_and(|end| end <= self.heap_end),
            "access outside the granted heap: start={start}, len={len}, heap=[{}, {})",
            self.heap_start,
            self.heap_end
        );
        start + len
    }
}
