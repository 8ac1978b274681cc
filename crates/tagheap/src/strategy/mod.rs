//! Free block tracking strategies.
//!
//! The allocator core owns splitting, coalescing and heap growth. A
//! [`FreeBlockIndex`] only answers "which free block should satisfy this
//! request" and is told whenever a block enters or leaves the free set.
//!
//! Two strategies are provided:
//!
//! - [`ImplicitList`] keeps no state and scans every block in address order.
//! - [`ExplicitList`] threads a circular doubly linked list through the
//!   payloads of the free blocks, so a search only visits free blocks.

pub use self::{
    explicit::{ExplicitList, FreeListDump},
    implicit::ImplicitList,
};
use crate::{addr::HeapAddr, block::Heap, error::HeapCheckError};

mod explicit;
mod implicit;

/// Index of the free blocks of a [`Heap`].
///
/// Every method receives the heap the index describes. An index must only
/// ever be used with the heap it was initialized on.
pub trait FreeBlockIndex: Default {
    /// Human-readable strategy name.
    const NAME: &'static str;

    /// Smallest block size this strategy can track.
    ///
    /// Requests are rounded up to it and a split never leaves a smaller free
    /// remainder.
    const MIN_BLOCK_SIZE: u32;

    /// Resets the index after the heap was re-initialized to a single free
    /// block.
    fn initialize(&mut self, heap: &mut Heap);

    /// Returns the first free block of at least `block_size` bytes.
    fn search(&self, heap: &Heap, block_size: u32) -> Option<HeapAddr>;

    /// Registers a block that just became free.
    fn insert(&mut self, heap: &mut Heap, header: HeapAddr);

    /// Unregisters a free block that is about to be allocated or merged.
    fn remove(&mut self, heap: &mut Heap, header: HeapAddr);

    /// Checks strategy-specific invariants against the heap.
    fn check(&self, heap: &Heap) -> Result<(), HeapCheckError>;
}
