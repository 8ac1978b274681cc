//! Intrusive circular free list.
//!
//! Each free block stores two 32-bit header offsets in the first payload
//! words:
//!
//! ```text
//!  header          +4              +8                          footer
//! ┌───────────────┬───────────────┬───────────────┬── ... ──┬───────────────┐
//! │ size | 0 | 0  │ prev free     │ next free     │         │ size | 0 | 0  │
//! └───────────────┴───────────────┴───────────────┴── ... ──┴───────────────┘
//! ```
//!
//! The list is circular and newly freed blocks become the head, so a search
//! finds the most recently freed block first.

use core::fmt;

use snafu::{OptionExt as _, ensure};

use super::FreeBlockIndex;
use crate::{
    addr::HeapAddr,
    block::Heap,
    config::{ALIGNMENT, WORD_SIZE},
    error::{
        BrokenLinkSnafu, FreeCountMismatchSnafu, HeapCheckError, ListNotCircularSnafu,
        MissingHeadSnafu, UndersizedFreeBlockSnafu,
    },
};

const PREV_OFFSET: u32 = 4;
const NEXT_OFFSET: u32 = 8;

/// Circular doubly linked list of free blocks, stored inside the blocks.
///
/// Only the head and the node count live outside the heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitList {
    head: Option<HeapAddr>,
    count: u32,
}

impl ExplicitList {
    /// Returns the header of the most recently inserted free block.
    #[must_use]
    pub fn head(&self) -> Option<HeapAddr> {
        self.head
    }

    /// Returns the number of blocks in the list.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates the list from the head, following the next links.
    pub fn iter<'a>(&self, heap: &'a Heap) -> impl Iterator<Item = HeapAddr> + 'a {
        let mut node = self.head;
        (0..self.count).map_while(move |_| {
            let current = node?;
            node = next_free(heap, current);
            Some(current)
        })
    }

    /// Returns a printable view of the list.
    #[must_use]
    pub fn display<'a>(&'a self, heap: &'a Heap) -> FreeListDump<'a> {
        FreeListDump { list: self, heap }
    }

    fn checked_link(
        heap: &Heap,
        header: HeapAddr,
        offset: u32,
    ) -> Result<HeapAddr, HeapCheckError> {
        let target = heap.block_ptr_field(header, Self::MIN_BLOCK_SIZE, offset);
        let valid = target.filter(|&target| {
            heap.first_block() <= target
                && target < heap.epilogue()
                && target.value() % ALIGNMENT == WORD_SIZE
                && !heap.is_allocated(target)
                && heap.block_size(target) >= Self::MIN_BLOCK_SIZE
        });
        valid.context(BrokenLinkSnafu { header })
    }
}

fn prev_free(heap: &Heap, header: HeapAddr) -> Option<HeapAddr> {
    heap.block_ptr_field(header, ExplicitList::MIN_BLOCK_SIZE, PREV_OFFSET)
}

fn next_free(heap: &Heap, header: HeapAddr) -> Option<HeapAddr> {
    heap.block_ptr_field(header, ExplicitList::MIN_BLOCK_SIZE, NEXT_OFFSET)
}

fn set_prev_free(heap: &mut Heap, header: HeapAddr, prev: Option<HeapAddr>) {
    heap.set_block_ptr_field(header, ExplicitList::MIN_BLOCK_SIZE, PREV_OFFSET, prev);
}

fn set_next_free(heap: &mut Heap, header: HeapAddr, next: Option<HeapAddr>) {
    heap.set_block_ptr_field(header, ExplicitList::MIN_BLOCK_SIZE, NEXT_OFFSET, next);
}

impl FreeBlockIndex for ExplicitList {
    const NAME: &'static str = "explicit";
    const MIN_BLOCK_SIZE: u32 = 16;

    fn initialize(&mut self, heap: &mut Heap) {
        *self = Self::default();
        let first = heap.first_block();
        self.insert(heap, first);
    }

    fn search(&self, heap: &Heap, block_size: u32) -> Option<HeapAddr> {
        self.iter(heap)
            .find(|&header| !heap.is_allocated(header) && heap.block_size(header) >= block_size)
    }

    fn insert(&mut self, heap: &mut Heap, header: HeapAddr) {
        debug_assert!(!heap.is_allocated(header));

        match self.head {
            None => {
                set_prev_free(heap, header, Some(header));
                set_next_free(heap, header, Some(header));
            }
            Some(head) => {
                let tail = prev_free(heap, head);
                set_next_free(heap, header, Some(head));
                set_prev_free(heap, header, tail);
                if let Some(tail) = tail {
                    set_next_free(heap, tail, Some(header));
                }
                set_prev_free(heap, head, Some(header));
            }
        }

        self.head = Some(header);
        self.count += 1;
    }

    fn remove(&mut self, heap: &mut Heap, header: HeapAddr) {
        assert!(self.count > 0, "remove from an empty free list: header={header}");

        if self.count == 1 {
            debug_assert_eq!(self.head, Some(header));
            self.head = None;
        } else {
            let prev = prev_free(heap, header);
            let next = next_free(heap, header);
            if let Some(prev) = prev {
                set_next_free(heap, prev, next);
            }
            if let Some(next) = next {
                set_prev_free(heap, next, prev);
            }
            if self.head == Some(header) {
                self.head = next;
            }
        }
        self.count -= 1;

        set_prev_free(heap, header, None);
        set_next_free(heap, header, None);
    }

    fn check(&self, heap: &Heap) -> Result<(), HeapCheckError> {
        let mut scanned = 0;
        let mut head_found = false;
        for block in heap.blocks().filter(|block| !block.allocated) {
            let header = block.header;
            ensure!(
                block.size >= Self::MIN_BLOCK_SIZE,
                UndersizedFreeBlockSnafu {
                    header,
                    size: block.size
                }
            );

            let prev = Self::checked_link(heap, header, PREV_OFFSET)?;
            let next = Self::checked_link(heap, header, NEXT_OFFSET)?;
            ensure!(
                next_free(heap, prev) == Some(header) && prev_free(heap, next) == Some(header),
                BrokenLinkSnafu { header }
            );

            head_found |= self.head == Some(header);
            scanned += 1;
        }

        ensure!(
            scanned == self.count,
            FreeCountMismatchSnafu {
                listed: self.count,
                scanned,
            }
        );

        let Some(head) = self.head else {
            return Ok(());
        };
        ensure!(head_found, MissingHeadSnafu { head: self.head });

        let mut backward = head;
        let mut forward = head;
        for _ in 0..self.count {
            backward = prev_free(heap, backward).context(BrokenLinkSnafu { header: backward })?;
            forward = next_free(heap, forward).context(BrokenLinkSnafu { header: forward })?;
        }
        ensure!(
            backward == head && forward == head,
            ListNotCircularSnafu { head }
        );

        Ok(())
    }
}

/// [`Display`](fmt::Display) adapter for an [`ExplicitList`].
///
/// Prints `<header:size/allocated>` for every node starting at the head.
pub struct FreeListDump<'a> {
    list: &'a ExplicitList,
    heap: &'a Heap,
}

impl fmt::Display for FreeListDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.list.head {
            Some(head) => writeln!(f, "explicit free list <{head},{}>:", self.list.count)?,
            None => writeln!(f, "explicit free list <-,{}>:", self.list.count)?,
        }
        for header in self.list.iter(self.heap) {
            let tag = self.heap.tag(header);
            write!(
                f,
                "<{header}:{}/{}> ",
                tag.size(),
                u8::from(tag.is_allocated())
            )?;
        }
        Ok(())
    }
}
