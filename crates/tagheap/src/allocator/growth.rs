//! Heap growth.
//!
//! The heap grows in whole pages at its end. The epilogue moves to the new
//! end and the granted bytes either extend a free last block or become a
//! new free block where the old epilogue was:
//!
//! ```text
//! before:  ... │ last (A) │ E │
//! after:   ... │ last (A) │ new free block ............ │ E │
//!
//! before:  ... │ last (F)     │ E │
//! after:   ... │ last (F) grown over the new pages ..... │ E │
//! ```

use log::debug;

use super::Allocator;
use crate::{
    addr::HeapAddr,
    block::{BlockTag, Heap},
    config::PAGE_SIZE,
    strategy::FreeBlockIndex,
};

impl Heap {
    /// Grants `size` more bytes, rounded up to whole pages, and rewrites the
    /// epilogue at the new end of the heap.
    ///
    /// Returns the number of bytes granted, or `None` if nothing was
    /// requested or the heap would exceed its capacity. The bytes between
    /// the old and new epilogue are left for the caller to turn into a
    /// block.
    pub(crate) fn extend_heap(&mut self, size: u32) -> Option<u32> {
        let size = size.checked_next_multiple_of(PAGE_SIZE)?;
        if size == 0 {
            return None;
        }
        let granted = self.arena_mut().grow(size)?;
        let epilogue = self.epilogue();
        self.set_tag(epilogue, BlockTag::new(0, true));
        Some(granted)
    }
}

impl<I> Allocator<I>
where
    I: FreeBlockIndex,
{
    /// Grows the heap enough to host a `requested`-byte block and allocates
    /// it from the new end.
    ///
    /// If the old last block is free it is merged with the new pages, so
    /// only the missing bytes are asked for. On failure the heap and the
    /// index are left as they were.
    pub(super) fn try_extend_heap_to_alloc(
        &mut self,
        requested: u32,
        min_block_size: u32,
    ) -> Option<HeapAddr> {
        let old_last = self.heap.last_block()?;
        let last_tag = self.heap.tag(old_last);
        let last_free = !last_tag.is_allocated();

        let to_request = if last_free {
            self.index.remove(&mut self.heap, old_last);
            requested.saturating_sub(last_tag.size())
        } else {
            requested
        };

        let old_epilogue = self.heap.epilogue();
        let Some(granted) = self.heap.extend_heap(to_request) else {
            if last_free {
                self.index.insert(&mut self.heap, old_last);
            }
            return None;
        };
        debug!(
            "heap extended: granted={granted}, heap_size={}, capacity={}",
            self.heap.heap_size(),
            self.heap.capacity()
        );

        let block = if last_free {
            self.heap
                .write_block(old_last, last_tag.size() + granted, false);
            old_last
        } else {
            self.heap.write_block(old_epilogue, granted, false);
            old_epilogue
        };
        self.index.insert(&mut self.heap, block);

        self.try_alloc_with_splitting(block, requested, min_block_size)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExplicitAllocator, HeapConfig, ImplicitAllocator};

    #[test]
    fn test_extend_heap_rounds_to_pages() {
        let mut heap = Heap::new(PAGE_SIZE * 4);
        heap.init();
        assert_eq!(heap.extend_heap(1), Some(PAGE_SIZE));
        assert_eq!(heap.heap_size(), PAGE_SIZE * 2);
        assert_eq!(heap.extend_heap(PAGE_SIZE + 1), Some(PAGE_SIZE * 2));
        assert_eq!(heap.heap_size(), PAGE_SIZE * 4);
        assert_eq!(heap.epilogue(), HeapAddr::new(PAGE_SIZE * 4 - 4));
        assert_eq!(heap.tag(heap.epilogue()), BlockTag::new(0, true));
    }

    #[test]
    fn test_extend_heap_refuses_past_capacity() {
        let mut heap = Heap::new(PAGE_SIZE * 2);
        heap.init();
        assert_eq!(heap.extend_heap(0), None);
        assert_eq!(heap.extend_heap(PAGE_SIZE * 2), None);
        assert_eq!(heap.heap_size(), PAGE_SIZE);
    }

    #[test]
    fn test_growth_after_allocated_last_block() {
        let mut allocator = ImplicitAllocator::new(HeapConfig::new()).unwrap();
        allocator.mem_alloc(4072).unwrap().unwrap();
        assert!(allocator.heap().is_allocated(allocator.heap().last_block()));

        let payload = allocator.mem_alloc(100).unwrap().unwrap();
        assert_eq!(payload, HeapAddr::new(4096));
        assert_eq!(allocator.heap().heap_size(), PAGE_SIZE * 2);
        let blocks = allocator
            .blocks()
            .map(|block| (block.size, block.allocated))
            .collect::<alloc::vec::Vec<_>>();
        assert_eq!(blocks, [(4080, true), (112, true), (4096 - 112, false)]);
        allocator.check_heap_correctness().unwrap();
    }

    #[test]
    fn test_growth_merges_free_last_block() {
        let mut allocator = ExplicitAllocator::new(HeapConfig::new()).unwrap();
        allocator.mem_alloc(2000).unwrap().unwrap();
        let last = allocator.heap().last_block().unwrap();
        assert_eq!(allocator.heap().block_size(last), 4080 - 2008);

        let payload = allocator.mem_alloc(3000).unwrap().unwrap();
        assert_eq!(payload.value(), last.value() + 4);
        assert_eq!(allocator.heap().heap_size(), PAGE_SIZE * 2);
        assert_eq!(allocator.stats().free_bytes, 8192 - 16 - 2008 - 3008);
        allocator.check_heap_correctness().unwrap();
    }

    #[test]
    fn test_failed_growth_restores_free_last_block() {
        let config = HeapConfig::new().with_capacity(PAGE_SIZE);
        let mut allocator = ExplicitAllocator::new(config).unwrap();
        allocator.mem_alloc(1000).unwrap().unwrap();

        assert_eq!(allocator.mem_alloc(3500).unwrap(), None);
        assert_eq!(allocator.index().len(), 1);
        assert_eq!(allocator.stats().free_bytes, 4080 - 1008);
        allocator.check_heap_correctness().unwrap();
    }
}
