//! A boundary-tag malloc/free engine over a simulated heap.
//!
//! The heap is a fixed-capacity byte arena addressed by `u32` offsets
//! ([`HeapAddr`]). It starts as one page and grows a page at a time up to
//! its configured capacity. Blocks carry their size and allocated bit in a
//! header and a matching footer word, which lets a freed block find and
//! merge with both of its neighbors in constant time.
//!
//! # Strategies
//!
//! The allocator core ([`Allocator`]) does first-fit search, splits blocks
//! on allocation and eagerly coalesces them on free. Which free block a
//! search visits is up to a [`FreeBlockIndex`]:
//!
//! | Strategy | Search cost | Minimum block |
//! |----------|-------------|---------------|
//! | [`ImplicitList`] | O(all blocks) | 8 bytes |
//! | [`ExplicitList`] | O(free blocks) | 16 bytes |
//!
//! # Usage
//!
//! ```rust
//! use tagheap::{HeapConfig, ImplicitAllocator};
//!
//! let mut allocator = ImplicitAllocator::new(HeapConfig::new()).unwrap();
//!
//! let a = allocator.mem_alloc(50).unwrap().unwrap();
//! let b = allocator.mem_alloc(50).unwrap().unwrap();
//! allocator.payload_mut(a).unwrap().fill(0xaa);
//!
//! allocator.mem_free(a).unwrap();
//! allocator.mem_free(b).unwrap();
//!
//! allocator.check_heap_correctness().unwrap();
//! assert_eq!(allocator.blocks().count(), 1);
//! ```
//!
//! # Thread Safety
//!
//! An [`Allocator`] is plain owned data and every operation takes
//! `&mut self`. Sharing one between threads requires an external lock.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use self::{
    addr::{HeapAddr, round_up},
    allocator::{Allocator, ExplicitAllocator, ImplicitAllocator},
    arena::Arena,
    block::{BlockTag, Heap, TagFlags, header_of, payload_of},
    check::{BlockInfo, Blocks, HeapDump, HeapStats},
    config::{ALIGNMENT, HEAP_MAX_SIZE, HeapConfig, PAGE_SIZE, WORD_SIZE},
    error::{AllocatorError, ConfigError, HeapCheckError},
    strategy::{ExplicitList, FreeBlockIndex, FreeListDump, ImplicitList},
};

mod addr;
mod allocator;
mod arena;
mod block;
mod check;
mod config;
mod error;
mod strategy;
