//! Whole-heap scan strategy.

use super::FreeBlockIndex;
use crate::{addr::HeapAddr, block::Heap, error::HeapCheckError};

/// Finds free blocks by walking every block from the first one.
///
/// The allocated bit in the boundary tags is the only record of which
/// blocks are free, so registering and unregistering are no-ops. Search cost
/// is linear in the total number of blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitList;

impl FreeBlockIndex for ImplicitList {
    const NAME: &'static str = "implicit";
    const MIN_BLOCK_SIZE: u32 = 8;

    fn initialize(&mut self, _heap: &mut Heap) {}

    fn search(&self, heap: &Heap, block_size: u32) -> Option<HeapAddr> {
        heap.blocks()
            .find(|block| !block.allocated && block.size >= block_size)
            .map(|block| block.header)
    }

    fn insert(&mut self, _heap: &mut Heap, _header: HeapAddr) {}

    fn remove(&mut self, _heap: &mut Heap, _header: HeapAddr) {}

    fn check(&self, _heap: &Heap) -> Result<(), HeapCheckError> {
        Ok(())
    }
}
