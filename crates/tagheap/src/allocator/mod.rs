//! Allocator core: first-fit search, split on allocate, coalesce on free.
//!
//! The core is generic over a [`FreeBlockIndex`]. It owns every change to
//! the boundary tags and tells the index whenever a block enters or leaves
//! the free set.

use core::cmp;

use log::{debug, trace, warn};
use snafu::{ResultExt as _, ensure};

use crate::{
    addr::{HeapAddr, round_up},
    block::{Heap, header_of, payload_of},
    check::{Blocks, HeapStats},
    config::{ALIGNMENT, HeapConfig, WORD_SIZE},
    error::{
        AllocatorError, ConfigError, CorruptedSnafu, DoubleFreeSnafu, HeapCheckError,
        InvalidAddressSnafu, InvalidSizeSnafu,
    },
    strategy::{ExplicitList, FreeBlockIndex, ImplicitList},
};

mod growth;

/// Allocator that finds free blocks by scanning the whole heap.
pub type ImplicitAllocator = Allocator<ImplicitList>;

/// Allocator that keeps free blocks in an intrusive circular list.
pub type ExplicitAllocator = Allocator<ExplicitList>;

/// A malloc/free engine over a simulated heap.
///
/// # Examples
///
/// ```
/// use tagheap::{ExplicitAllocator, HeapConfig};
///
/// let mut allocator = ExplicitAllocator::new(HeapConfig::new()).unwrap();
/// let payload = allocator.mem_alloc(100).unwrap().unwrap();
/// assert_eq!(payload.value() % 8, 0);
///
/// allocator.mem_free(payload).unwrap();
/// allocator.check_heap_correctness().unwrap();
/// assert_eq!(allocator.stats().free_blocks, 1);
/// ```
#[derive(Debug)]
pub struct Allocator<I> {
    heap: Heap,
    index: I,
    config: HeapConfig,
}

impl<I> Allocator<I>
where
    I: FreeBlockIndex,
{
    /// Creates an allocator and initializes its heap.
    pub fn new(config: HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut allocator = Self {
            heap: Heap::new(config.capacity()),
            index: I::default(),
            config,
        };
        allocator.heap_init();
        Ok(allocator)
    }

    /// Resets the heap to a single page holding one free block.
    ///
    /// Every outstanding payload address becomes invalid. Always returns
    /// `true`.
    pub fn heap_init(&mut self) -> bool {
        self.heap.init();
        self.index.initialize(&mut self.heap);
        debug!(
            "heap initialized: strategy={}, heap_size={}, capacity={}",
            I::NAME,
            self.heap.heap_size(),
            self.heap.capacity()
        );
        true
    }

    /// Allocates a block with at least `size` payload bytes.
    ///
    /// Returns the 8-byte aligned payload address, or `Ok(None)` if the heap
    /// cannot grow enough to satisfy the request.
    pub fn mem_alloc(&mut self, size: u32) -> Result<Option<HeapAddr>, AllocatorError> {
        let capacity = self.config.capacity();
        ensure!(
            0 < size && size < capacity,
            InvalidSizeSnafu { size, capacity }
        );

        let block_size = cmp::max(round_up(size, ALIGNMENT) + 2 * WORD_SIZE, I::MIN_BLOCK_SIZE);
        let payload = match self.index.search(&self.heap, block_size) {
            Some(header) => {
                let payload = self.try_alloc_with_splitting(header, block_size, I::MIN_BLOCK_SIZE);
                debug_assert!(payload.is_some(), "search returned an unusable block");
                payload
            }
            None => self.try_extend_heap_to_alloc(block_size, I::MIN_BLOCK_SIZE),
        };

        match payload {
            Some(payload) => trace!("mem_alloc: size={size}, block_size={block_size}, payload={payload}"),
            None => warn!(
                "mem_alloc: out of heap: size={size}, heap_size={}, capacity={capacity}",
                self.heap.heap_size()
            ),
        }

        self.verify("mem_alloc")?;
        Ok(payload)
    }

    /// Frees a block previously returned by [`mem_alloc`](Self::mem_alloc)
    /// and merges it with any free neighbor.
    ///
    /// Freeing `None` does nothing.
    pub fn mem_free(&mut self, payload: impl Into<Option<HeapAddr>>) -> Result<(), AllocatorError> {
        let Some(payload) = payload.into() else {
            return Ok(());
        };
        let header = self.validate_payload(payload)?;
        let size = self.heap.block_size(header);

        let prev = self
            .heap
            .prev_header(header)
            .filter(|&prev| !self.heap.is_allocated(prev));
        let next = self
            .heap
            .next_header(header)
            .filter(|&next| !self.heap.is_allocated(next));

        self.heap.write_block(header, size, false);
        let mut merged = header;
        if let Some(next) = next {
            self.index.remove(&mut self.heap, next);
            merged = self.merge_blocks_as_free(merged, next);
        }
        if let Some(prev) = prev {
            self.index.remove(&mut self.heap, prev);
            merged = self.merge_blocks_as_free(prev, merged);
        }
        self.index.insert(&mut self.heap, merged);

        trace!(
            "mem_free: payload={payload}, size={size}, merged={merged}, merged_size={}",
            self.heap.block_size(merged)
        );

        self.verify("mem_free")
    }

    /// Carves a block of exactly `requested` bytes out of the free block at
    /// `header`.
    ///
    /// The remainder becomes a new free block if it is at least
    /// `min_block_size` bytes; otherwise the whole block is handed out.
    /// Returns `None` without touching the heap if `requested` is below
    /// `min_block_size` or the block is allocated or too small.
    pub fn try_alloc_with_splitting(
        &mut self,
        header: HeapAddr,
        requested: u32,
        min_block_size: u32,
    ) -> Option<HeapAddr> {
        if requested < min_block_size {
            return None;
        }
        let tag = self.heap.tag(header);
        if tag.is_allocated() || tag.size() < requested {
            return None;
        }

        self.index.remove(&mut self.heap, header);

        let remainder = tag.size() - requested;
        if remainder >= min_block_size {
            self.heap.write_block(header, requested, true);
            let rest = header + requested;
            self.heap.write_block(rest, remainder, false);
            self.index.insert(&mut self.heap, rest);
        } else {
            self.heap.write_block(header, tag.size(), true);
        }

        Some(payload_of(header))
    }

    /// Merges two adjacent blocks into one free block starting at `low`.
    fn merge_blocks_as_free(&mut self, low: HeapAddr, high: HeapAddr) -> HeapAddr {
        debug_assert_eq!(self.heap.next_header(low), Some(high));
        debug_assert_eq!(self.heap.prev_header(high), Some(low));

        let size = self.heap.block_size(low) + self.heap.block_size(high);
        self.heap.write_block(low, size, false);
        low
    }

    /// Resolves a payload address to the header of the allocated block it
    /// belongs to.
    fn validate_payload(&self, payload: HeapAddr) -> Result<HeapAddr, AllocatorError> {
        let heap = &self.heap;
        let epilogue = heap.epilogue();
        ensure!(
            payload.is_aligned(ALIGNMENT)
                && payload_of(heap.first_block()) <= payload
                && payload < epilogue,
            InvalidAddressSnafu { addr: payload }
        );

        let header = header_of(payload);
        let tag = heap.tag(header);
        let size = tag.size();
        ensure!(
            size >= 2 * WORD_SIZE
                && header.checked_add(size).is_some_and(|end| end <= epilogue)
                && heap.tag(header + size - WORD_SIZE) == tag,
            InvalidAddressSnafu { addr: payload }
        );
        ensure!(tag.is_allocated(), DoubleFreeSnafu { header });

        Ok(header)
    }

    fn verify(&self, operation: &'static str) -> Result<(), AllocatorError> {
        if self.config.verify_each_operation() {
            self.check_heap_correctness()
                .context(CorruptedSnafu { operation })?;
        }
        Ok(())
    }

    /// Checks every heap invariant, including the index-specific ones.
    pub fn check_heap_correctness(&self) -> Result<(), HeapCheckError> {
        self.heap.check_blocks()?;
        self.index.check(&self.heap)
    }

    /// Returns the payload bytes of an allocated block.
    pub fn payload(&self, payload: HeapAddr) -> Result<&[u8], AllocatorError> {
        let header = self.validate_payload(payload)?;
        Ok(self.heap.payload(header))
    }

    /// Returns the payload bytes of an allocated block, mutably.
    pub fn payload_mut(&mut self, payload: HeapAddr) -> Result<&mut [u8], AllocatorError> {
        let header = self.validate_payload(payload)?;
        Ok(self.heap.payload_mut(header))
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[must_use]
    pub fn index(&self) -> &I {
        &self.index
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        self.heap.blocks()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }
}
