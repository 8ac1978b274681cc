//! Block codec and boundary-tag traversal.
//!
//! A block is the byte range `[header, header + size)`. Its first and last
//! words are boundary tags that encode the same size and flags:
//!
//! ```text
//!  header (8n+4)      payload (8n+8)                     footer
//! ┌────────────────┬──────────────────────────────────┬────────────────┐
//! │ size | C | A   │ user data, or free-list links    │ size | C | A   │
//! └────────────────┴──────────────────────────────────┴────────────────┘
//!  bits 31:3 = size, bit 1 = color (reserved), bit 0 = allocated
//! ```
//!
//! The heap is bracketed by two permanently allocated sentinels:
//!
//! ```text
//! 0    4          12                                  heap_end-4  heap_end
//! ┌────┬──────────┬───────────── ... ─────────────────┬───────────┐
//! │pad │ prologue │ regular blocks                    │ epilogue  │
//! │    │ (8, A)   │                                   │ (0, A)    │
//! └────┴──────────┴───────────── ... ─────────────────┴───────────┘
//! ```
//!
//! All tag bit manipulation lives in [`BlockTag`]; nothing else in the crate
//! shifts or masks header words.

use core::fmt;

use bitflags::bitflags;

use crate::{
    addr::HeapAddr,
    arena::Arena,
    config::{ALIGNMENT, PAGE_SIZE, WORD_SIZE},
};

bitflags! {
    /// Low bits of a boundary tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagFlags: u32 {
        /// Allocated bit.
        ///
        /// Sentinels always have it set.
        const ALLOCATED = 1 << 0;

        /// Color bit.
        ///
        /// Reserved for a tree-indexed free block strategy. The list
        /// strategies preserve it but never read it.
        const COLOR = 1 << 1;
    }
}

const FLAGS_MASK: u32 = ALIGNMENT - 1;
const SIZE_MASK: u32 = !FLAGS_MASK;

const _: () = assert!(FLAGS_MASK.count_ones() == 3);
const _: () = assert!(TagFlags::all().bits() & SIZE_MASK == 0);

/// Address of the prologue header.
const PROLOGUE: HeapAddr = HeapAddr::new(WORD_SIZE);
/// Size of the prologue block (header and footer only).
const PROLOGUE_SIZE: u32 = 2 * WORD_SIZE;
/// Address of the header of the first regular block.
const FIRST_BLOCK: HeapAddr = HeapAddr::new(PROLOGUE.value() + PROLOGUE_SIZE);

const _: () = assert!(FIRST_BLOCK.value() % ALIGNMENT == WORD_SIZE);

/// A 32-bit boundary tag word.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BlockTag(u32);

impl fmt::Debug for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockTag")
            .field("size", &self.size())
            .field("flags", &self.flags())
            .finish()
    }
}

impl BlockTag {
    /// Creates a tag with the given size and allocated bit and a clear color
    /// bit.
    #[must_use]
    pub const fn new(size: u32, allocated: bool) -> Self {
        debug_assert!(size.is_multiple_of(ALIGNMENT));
        Self((size & SIZE_MASK) | allocated as u32)
    }

    /// Reinterprets a raw tag word.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw tag word.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the block size in bytes.
    #[must_use]
    pub const fn size(self) -> u32 {
        self.0 & SIZE_MASK
    }

    /// Returns a copy with the size replaced and flag bits preserved.
    #[must_use]
    pub const fn with_size(self, size: u32) -> Self {
        debug_assert!(size.is_multiple_of(ALIGNMENT));
        Self((self.0 & FLAGS_MASK) | (size & SIZE_MASK))
    }

    #[must_use]
    pub const fn flags(self) -> TagFlags {
        TagFlags::from_bits_retain(self.0 & FLAGS_MASK)
    }

    #[must_use]
    pub const fn is_allocated(self) -> bool {
        self.flags().contains(TagFlags::ALLOCATED)
    }

    /// Returns a copy with the allocated bit replaced and all other bits
    /// preserved.
    #[must_use]
    pub const fn with_allocated(self, allocated: bool) -> Self {
        Self((self.0 & !TagFlags::ALLOCATED.bits()) | allocated as u32)
    }

    #[must_use]
    pub const fn color(self) -> bool {
        self.flags().contains(TagFlags::COLOR)
    }
}

/// Maps a header or payload address to its block header.
///
/// Headers sit at `8n + 4` and payloads at `8n + 8`, so both round up to the
/// same payload and step back one word.
#[must_use]
pub const fn header_of(addr: HeapAddr) -> HeapAddr {
    HeapAddr::new(addr.round_up(ALIGNMENT).value() - WORD_SIZE)
}

/// Maps a header or payload address to its block payload.
#[must_use]
pub const fn payload_of(addr: HeapAddr) -> HeapAddr {
    addr.round_up(ALIGNMENT)
}

/// Block-level view of the arena.
#[derive(Debug)]
pub struct Heap {
    arena: Arena,
}

impl Heap {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            arena: Arena::new(capacity),
        }
    }

    /// Resets the arena to one page holding the sentinels and a single free
    /// block between them.
    pub(crate) fn init(&mut self) {
        self.arena.reset(PAGE_SIZE);

        self.write_block(PROLOGUE, PROLOGUE_SIZE, true);
        self.set_tag(self.epilogue(), BlockTag::new(0, true));

        let first_size = self.epilogue() - FIRST_BLOCK;
        self.write_block(FIRST_BLOCK, first_size, false);
    }

    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Returns the maximum heap size in bytes.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.arena.capacity()
    }

    /// Returns the number of bytes currently granted to the heap.
    #[must_use]
    pub fn heap_size(&self) -> u32 {
        self.arena.size()
    }

    #[must_use]
    pub fn heap_end(&self) -> HeapAddr {
        self.arena.heap_end()
    }

    #[must_use]
    pub fn prologue(&self) -> HeapAddr {
        PROLOGUE
    }

    #[must_use]
    pub fn epilogue(&self) -> HeapAddr {
        self.arena.heap_end() - WORD_SIZE
    }

    #[must_use]
    pub fn first_block(&self) -> HeapAddr {
        FIRST_BLOCK
    }

    /// Returns the header of the block just before the epilogue.
    ///
    /// Returns `None` only if the heap holds no regular block at all.
    #[must_use]
    pub fn last_block(&self) -> Option<HeapAddr> {
        self.prev_header(self.epilogue())
            .filter(|&header| header != PROLOGUE)
    }

    /// Reads the boundary tag at `addr`.
    #[must_use]
    pub fn tag(&self, addr: HeapAddr) -> BlockTag {
        self.debug_assert_tag_addr(addr);
        BlockTag::from_bits(self.arena.read_word(addr))
    }

    pub(crate) fn set_tag(&mut self, addr: HeapAddr, tag: BlockTag) {
        self.debug_assert_tag_addr(addr);
        self.arena.write_word(addr, tag.bits());
    }

    #[must_use]
    pub fn block_size(&self, addr: HeapAddr) -> u32 {
        self.tag(addr).size()
    }

    pub(crate) fn set_block_size(&mut self, addr: HeapAddr, size: u32) {
        let tag = self.tag(addr).with_size(size);
        self.set_tag(addr, tag);
    }

    /// Returns the allocated bit of the tag at `addr`.
    ///
    /// A missing block (`None`) counts as allocated, so a neighbor that does
    /// not exist is never coalesced with.
    #[must_use]
    pub fn is_allocated(&self, addr: impl Into<Option<HeapAddr>>) -> bool {
        addr.into().is_none_or(|addr| self.tag(addr).is_allocated())
    }

    pub(crate) fn set_allocated(&mut self, addr: HeapAddr, allocated: bool) {
        let tag = self.tag(addr).with_allocated(allocated);
        self.set_tag(addr, tag);
    }

    /// Returns the footer address of the block whose header is `header`.
    #[must_use]
    pub fn footer(&self, header: HeapAddr) -> HeapAddr {
        header + self.block_size(header) - WORD_SIZE
    }

    /// Returns the header of the block after `addr`.
    ///
    /// The last regular block is followed by the epilogue. Returns `None` if
    /// `addr` is the epilogue itself.
    #[must_use]
    pub fn next_header(&self, addr: HeapAddr) -> Option<HeapAddr> {
        let epilogue = self.epilogue();
        if addr == epilogue {
            return None;
        }
        debug_assert!(PROLOGUE <= addr && addr < epilogue);

        let header = header_of(addr);
        let next = header + self.block_size(header);
        debug_assert!(FIRST_BLOCK <= next && next <= epilogue);
        Some(next)
    }

    /// Returns the header of the block before `addr`, found through the
    /// previous block's footer.
    ///
    /// The first regular block is preceded by the prologue. Returns `None` if
    /// `addr` is the prologue itself.
    #[must_use]
    pub fn prev_header(&self, addr: HeapAddr) -> Option<HeapAddr> {
        if addr == PROLOGUE {
            return None;
        }
        debug_assert!(FIRST_BLOCK <= addr && addr <= self.epilogue());

        let header = header_of(addr);
        let prev = header - self.block_size(header - WORD_SIZE);
        debug_assert!(PROLOGUE <= prev && prev < header);
        Some(prev)
    }

    #[must_use]
    pub fn is_first_block(&self, addr: HeapAddr) -> bool {
        header_of(addr) == FIRST_BLOCK
    }

    #[must_use]
    pub fn is_last_block(&self, addr: HeapAddr) -> bool {
        self.next_header(addr) == Some(self.epilogue())
    }

    /// Reads a 32-bit block pointer stored `offset` bytes after `header`.
    ///
    /// The block must be at least `min_block_size` bytes so the field lies
    /// inside it. A stored zero reads back as `None`.
    #[must_use]
    pub fn block_ptr_field(
        &self,
        header: HeapAddr,
        min_block_size: u32,
        offset: u32,
    ) -> Option<HeapAddr> {
        self.debug_assert_ptr_field(header, min_block_size, offset);
        let raw = self.arena.read_word(header + offset);
        (raw != 0).then_some(HeapAddr::new(raw))
    }

    /// Stores a 32-bit block pointer `offset` bytes after `header`.
    ///
    /// `None` is stored as zero.
    pub(crate) fn set_block_ptr_field(
        &mut self,
        header: HeapAddr,
        min_block_size: u32,
        offset: u32,
        block: Option<HeapAddr>,
    ) {
        self.debug_assert_ptr_field(header, min_block_size, offset);
        if let Some(block) = block {
            debug_assert_eq!(block.value() % ALIGNMENT, WORD_SIZE);
            debug_assert!(self.block_size(block) >= min_block_size);
        }
        self.arena
            .write_word(header + offset, block.map_or(0, HeapAddr::value));
    }

    /// Writes matching header and footer tags for a block.
    ///
    /// The color bit is cleared.
    pub(crate) fn write_block(&mut self, header: HeapAddr, size: u32, allocated: bool) {
        let tag = BlockTag::new(size, allocated);
        self.set_tag(header, tag);
        self.set_tag(header + size - WORD_SIZE, tag);
    }

    /// Returns the payload bytes of the block at `header`.
    #[must_use]
    pub fn payload(&self, header: HeapAddr) -> &[u8] {
        let size = self.block_size(header);
        self.arena
            .bytes(payload_of(header), size - 2 * WORD_SIZE)
    }

    pub(crate) fn payload_mut(&mut self, header: HeapAddr) -> &mut [u8] {
        let size = self.block_size(header);
        self.arena
            .bytes_mut(payload_of(header), size - 2 * WORD_SIZE)
    }

    fn debug_assert_tag_addr(&self, addr: HeapAddr) {
        debug_assert!(
            PROLOGUE <= addr && addr <= self.epilogue(),
            "tag address outside [prologue, epilogue]: addr={addr}"
        );
        debug_assert!(
            addr.is_aligned(WORD_SIZE),
            "tag address is not 4-byte aligned: addr={addr}"
        );
    }

    fn debug_assert_ptr_field(&self, header: HeapAddr, min_block_size: u32, offset: u32) {
        debug_assert!(FIRST_BLOCK <= header && header < self.epilogue());
        debug_assert_eq!(header.value() % ALIGNMENT, WORD_SIZE);
        debug_assert!(offset.is_multiple_of(WORD_SIZE));
        debug_assert!(offset + WORD_SIZE <= min_block_size - WORD_SIZE);
        debug_assert!(self.block_size(header) >= min_block_size);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn heap() -> Heap {
        let mut heap = Heap::new(PAGE_SIZE * 8);
        heap.init();
        heap
    }

    #[test]
    fn test_tag_size_keeps_flag_bits() {
        for word in [0x1234_abc0_u32, 0x1234_abc1, 0x1234_abc2, 0x1234_abc7] {
            let tag = BlockTag::from_bits(word);
            assert_eq!(tag.size(), 0x1234_abc0);
            let tag = tag.with_size(0x0000_0f10);
            assert_eq!(tag.size(), 0x0000_0f10);
            assert_eq!(tag.bits() & 0b111, word & 0b111);
        }
    }

    #[test]
    fn test_tag_allocated_keeps_other_bits() {
        let tag = BlockTag::from_bits(0x1234_abc2);
        assert!(!tag.is_allocated());
        assert!(tag.color());

        let tag = tag.with_allocated(true);
        assert_eq!(tag.bits(), 0x1234_abc3);
        assert!(tag.color());

        let tag = tag.with_allocated(false);
        assert_eq!(tag.bits(), 0x1234_abc2);
    }

    #[test]
    fn test_tag_new() {
        let tag = BlockTag::new(112, true);
        assert_eq!(tag.bits(), 113);
        assert_eq!(tag.flags(), TagFlags::ALLOCATED);
        assert_eq!(BlockTag::new(16, false).flags(), TagFlags::empty());
    }

    #[test]
    fn test_header_and_payload_mapping() {
        for i in 1..100 {
            let header = HeapAddr::new(i * 8 + 4);
            let payload = HeapAddr::new(i * 8 + 8);
            assert_eq!(header_of(header), header);
            assert_eq!(header_of(payload), header);
            assert_eq!(payload_of(header), payload);
            assert_eq!(payload_of(payload), payload);
        }
    }

    #[test]
    fn test_init_layout() {
        let heap = heap();
        assert_eq!(heap.heap_size(), PAGE_SIZE);
        assert_eq!(heap.prologue(), HeapAddr::new(4));
        assert_eq!(heap.first_block(), HeapAddr::new(12));
        assert_eq!(heap.epilogue(), HeapAddr::new(4092));

        assert_eq!(heap.tag(HeapAddr::new(4)), BlockTag::new(8, true));
        assert_eq!(heap.tag(HeapAddr::new(8)), BlockTag::new(8, true));
        assert_eq!(heap.tag(heap.epilogue()), BlockTag::new(0, true));

        let first = heap.first_block();
        assert_eq!(heap.block_size(first), 4080);
        assert!(!heap.is_allocated(first));
        assert_eq!(heap.footer(first), HeapAddr::new(4088));
        assert_eq!(heap.tag(heap.footer(first)), heap.tag(first));
        assert_eq!(heap.last_block(), Some(first));
        assert!(heap.is_first_block(first));
        assert!(heap.is_last_block(first));
    }

    #[test]
    fn test_missing_block_counts_as_allocated() {
        let heap = heap();
        assert!(heap.is_allocated(None));
        assert!(!heap.is_allocated(heap.first_block()));
    }

    #[test]
    fn test_set_size_and_allocated() {
        let mut heap = heap();
        let first = heap.first_block();
        heap.set_allocated(first, true);
        assert!(heap.is_allocated(first));
        assert_eq!(heap.block_size(first), 4080);

        heap.set_block_size(first, 64);
        assert_eq!(heap.block_size(first), 64);
        assert!(heap.is_allocated(first));
    }

    #[test]
    fn test_sentinel_neighbors() {
        let heap = heap();
        let first = heap.first_block();
        assert_eq!(heap.prev_header(first), Some(heap.prologue()));
        assert_eq!(heap.next_header(first), Some(heap.epilogue()));
        assert_eq!(heap.prev_header(heap.prologue()), None);
        assert_eq!(heap.next_header(heap.epilogue()), None);
        assert!(heap.is_allocated(heap.prev_header(first)));
        assert!(heap.is_allocated(heap.next_header(first)));
    }

    #[test]
    fn test_traversal_over_random_layout() {
        use rand::{Rng as _, SeedableRng as _, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..100 {
            let mut heap = heap();

            let mut headers = Vec::new();
            let mut header = heap.first_block();
            let epilogue = heap.epilogue();
            while header < epilogue {
                let remaining = epilogue - header;
                let size = if remaining <= 64 {
                    remaining
                } else {
                    rng.random_range(1..=8) * 8
                };
                heap.write_block(header, size, rng.random_bool(0.5));
                headers.push(header);
                header = header + size;
            }

            for pair in headers.windows(2) {
                assert_eq!(heap.next_header(pair[0]), Some(pair[1]));
                assert_eq!(heap.prev_header(pair[1]), Some(pair[0]));
                assert_eq!(heap.next_header(payload_of(pair[0])), Some(pair[1]));
            }
            assert_eq!(heap.last_block(), headers.last().copied());
        }
    }

    #[test]
    fn test_block_ptr_field() {
        let mut heap = heap();
        let first = heap.first_block();
        heap.write_block(first, 32, false);
        heap.write_block(first + 32, 4080 - 32, false);

        assert_eq!(heap.block_ptr_field(first, 16, 4), None);
        heap.set_block_ptr_field(first, 16, 4, Some(first + 32));
        heap.set_block_ptr_field(first, 16, 8, Some(first));
        assert_eq!(heap.block_ptr_field(first, 16, 4), Some(HeapAddr::new(44)));
        assert_eq!(heap.block_ptr_field(first, 16, 8), Some(first));

        heap.set_block_ptr_field(first, 16, 4, None);
        assert_eq!(heap.block_ptr_field(first, 16, 4), None);
    }

    #[test]
    fn test_payload_bounds() {
        let mut heap = heap();
        let first = heap.first_block();
        heap.write_block(first, 24, true);
        heap.write_block(first + 24, 4080 - 24, false);
        heap.payload_mut(first).fill(0x33);

        assert_eq!(heap.payload(first).len(), 16);
        assert!(heap.payload(first).iter().all(|&b| b == 0x33));
        assert_eq!(heap.tag(first + 24), BlockTag::new(4056, false));
    }
}
