use snafu::{Location, Snafu};

use crate::addr::HeapAddr;

/// Errors returned by [`Allocator`](crate::Allocator) operations.
///
/// Running out of heap is not an error: `mem_alloc` reports it as
/// `Ok(None)`. Every variant here is a misuse of the allocator or a
/// detected corruption.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocatorError {
    #[snafu(display("invalid allocation size: size={size}, capacity={capacity}"))]
    InvalidSize {
        size: u32,
        capacity: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("address is not an allocated payload: addr={addr}"))]
    InvalidAddress {
        addr: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block freed twice: header={header}"))]
    DoubleFree {
        header: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap corrupted after {operation}"))]
    Corrupted {
        operation: &'static str,
        source: HeapCheckError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Invariant violations found by the heap checker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapCheckError {
    #[snafu(display("sentinel block overwritten: header={header}"))]
    SentinelCorrupted {
        header: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block header is not at an 8n+4 offset: header={header}"))]
    Misaligned {
        header: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "block does not fit in the heap: header={header}, size={size}, epilogue={epilogue}"
    ))]
    BlockOutOfBounds {
        header: HeapAddr,
        size: u32,
        epilogue: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("header and footer disagree: header={header}, footer={footer}"))]
    TagMismatch {
        header: HeapAddr,
        footer: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block follows another free block: header={header}"))]
    AdjacentFree {
        header: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block too small for list links: header={header}, size={size}"))]
    UndersizedFreeBlock {
        header: HeapAddr,
        size: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list count mismatch: listed={listed}, scanned={scanned}"))]
    FreeCountMismatch {
        listed: u32,
        scanned: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list links of block are broken: header={header}"))]
    BrokenLink {
        header: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list head is not a free block in the heap: head={head:?}"))]
    MissingHead {
        head: Option<HeapAddr>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list does not return to its head: head={head}"))]
    ListNotCircular {
        head: HeapAddr,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors in a [`HeapConfig`](crate::HeapConfig).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("heap capacity must be a non-zero multiple of 4096: capacity={capacity}"))]
    InvalidCapacity {
        capacity: u32,
        #[snafu(implicit)]
        location: Location,
    },
}
