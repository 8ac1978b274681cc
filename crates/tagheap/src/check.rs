//! Heap walking, invariant checking and diagnostics.

use core::fmt;

use snafu::ensure;

use crate::{
    addr::HeapAddr,
    block::{BlockTag, Heap},
    config::{ALIGNMENT, WORD_SIZE},
    error::{
        AdjacentFreeSnafu, BlockOutOfBoundsSnafu, HeapCheckError, MisalignedSnafu,
        SentinelCorruptedSnafu, TagMismatchSnafu,
    },
};

/// Snapshot of one regular block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub header: HeapAddr,
    pub footer: HeapAddr,
    pub size: u32,
    pub allocated: bool,
    pub color: bool,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "H:{} F:{} S:{} (A:{}, C:{})",
            self.header,
            self.footer,
            self.size,
            u8::from(self.allocated),
            u8::from(self.color)
        )
    }
}

/// Iterator over the regular blocks of a heap in address order.
///
/// Created by [`Heap::blocks`]. The walk stops early at a block whose size
/// would not move it forward or would run past the epilogue; that block is
/// still yielded so the checker can report it.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    heap: &'a Heap,
    next: Option<HeapAddr>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.next?;
        let epilogue = self.heap.epilogue();
        if header >= epilogue {
            self.next = None;
            return None;
        }

        let tag = self.heap.tag(header);
        let size = tag.size();
        let end = header
            .checked_add(size)
            .filter(|&end| size != 0 && end <= epilogue);
        self.next = end;

        Some(BlockInfo {
            header,
            footer: end.map_or(header, |end| end - WORD_SIZE),
            size,
            allocated: tag.is_allocated(),
            color: tag.color(),
        })
    }
}

impl Heap {
    /// Walks all regular blocks from the first block to the last.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            next: Some(self.first_block()),
        }
    }

    /// Checks the block-level invariants of the heap.
    ///
    /// Verifies the sentinels, then for every block: header alignment,
    /// that the block fits before the epilogue, that header and footer
    /// agree on size and allocated bit, and that no two free blocks are
    /// adjacent.
    pub fn check_blocks(&self) -> Result<(), HeapCheckError> {
        let prologue = self.prologue();
        let prologue_tag = BlockTag::new(2 * WORD_SIZE, true);
        ensure!(
            self.tag(prologue) == prologue_tag && self.tag(prologue + WORD_SIZE) == prologue_tag,
            SentinelCorruptedSnafu { header: prologue }
        );
        let epilogue = self.epilogue();
        let epilogue_tag = self.tag(epilogue);
        ensure!(
            epilogue_tag.size() == 0 && epilogue_tag.is_allocated(),
            SentinelCorruptedSnafu { header: epilogue }
        );

        let mut prev_free = false;
        for block in self.blocks() {
            let header = block.header;
            ensure!(
                header.value() % ALIGNMENT == WORD_SIZE,
                MisalignedSnafu { header }
            );
            ensure!(
                block.size >= 2 * WORD_SIZE
                    && header.checked_add(block.size).is_some_and(|end| end <= epilogue),
                BlockOutOfBoundsSnafu {
                    header,
                    size: block.size,
                    epilogue,
                }
            );

            let footer = block.footer;
            let header_tag = self.tag(header);
            let footer_tag = self.tag(footer);
            ensure!(
                header_tag.size() == footer_tag.size()
                    && header_tag.is_allocated() == footer_tag.is_allocated(),
                TagMismatchSnafu { header, footer }
            );

            ensure!(!prev_free || block.allocated, AdjacentFreeSnafu { header });
            prev_free = !block.allocated;
        }

        Ok(())
    }

    /// Collects usage statistics by walking the heap.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                heap_size: self.heap_size(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                stats.blocks += 1;
                if block.allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                stats
            },
        )
    }

    /// Returns a printable view of every block.
    #[must_use]
    pub fn dump(&self) -> HeapDump<'_> {
        HeapDump { heap: self }
    }
}

/// Usage statistics of a heap.
///
/// Byte counts are whole block sizes, boundary tags included.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub heap_size: u32,
    pub blocks: u32,
    pub free_blocks: u32,
    pub allocated_blocks: u32,
    pub free_bytes: u32,
    pub allocated_bytes: u32,
    pub largest_free: u32,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap size:        {}", self.heap_size)?;
        writeln!(
            f,
            "blocks:           {} ({} allocated, {} free)",
            self.blocks, self.allocated_blocks, self.free_blocks
        )?;
        writeln!(f, "allocated bytes:  {}", self.allocated_bytes)?;
        writeln!(f, "free bytes:       {}", self.free_bytes)?;
        write!(f, "largest free:     {}", self.largest_free)
    }
}

/// [`Display`](fmt::Display) adapter printing one [`BlockInfo`] per line.
pub struct HeapDump<'a> {
    heap: &'a Heap,
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "heap [{}, {}):",
            self.heap.arena().heap_start(),
            self.heap.heap_end()
        )?;
        for block in self.heap.blocks() {
            writeln!(f, "{block}")?;
        }
        Ok(())
    }
}
