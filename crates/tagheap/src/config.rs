//! Heap geometry constants and allocator configuration.

use snafu::ensure;

use crate::error::{ConfigError, InvalidCapacitySnafu};

/// Granularity of heap growth, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Default upper bound of the heap, in bytes.
pub const HEAP_MAX_SIZE: u32 = PAGE_SIZE * 8;

/// Size of a header or footer word, in bytes.
pub const WORD_SIZE: u32 = 4;

/// Alignment of payload addresses and block sizes, in bytes.
pub const ALIGNMENT: u32 = 8;

/// Configuration of an [`Allocator`](crate::Allocator).
///
/// # Examples
///
/// ```
/// use tagheap::{HeapConfig, PAGE_SIZE};
///
/// let config = HeapConfig::new()
///     .with_capacity(PAGE_SIZE * 2)
///     .with_verification(true);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.capacity(), 8192);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    capacity: u32,
    verify_each_operation: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Creates the default configuration: a [`HEAP_MAX_SIZE`] heap without
    /// per-operation verification.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: HEAP_MAX_SIZE,
            verify_each_operation: false,
        }
    }

    /// Sets the maximum size the heap may grow to.
    #[must_use]
    pub const fn with_capacity(self, capacity: u32) -> Self {
        Self { capacity, ..self }
    }

    /// Runs the invariant checker after every `mem_alloc` and `mem_free`.
    ///
    /// A failed check is reported as
    /// [`AllocatorError::Corrupted`](crate::AllocatorError::Corrupted).
    #[must_use]
    pub const fn with_verification(self, verify_each_operation: bool) -> Self {
        Self {
            verify_each_operation,
            ..self
        }
    }

    /// Returns the maximum heap size in bytes.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns whether the heap is verified after every operation.
    #[must_use]
    pub const fn verify_each_operation(&self) -> bool {
        self.verify_each_operation
    }

    /// Checks that the capacity is a non-zero whole number of pages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.capacity;
        ensure!(
            capacity != 0 && capacity.is_multiple_of(PAGE_SIZE),
            InvalidCapacitySnafu { capacity }
        );
        Ok(())
    }
}
