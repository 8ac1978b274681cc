#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use proptest::{prelude::*, sample::Index};
use tagheap::{
    Allocator, ExplicitList, FreeBlockIndex, HeapAddr, HeapConfig, ImplicitList, PAGE_SIZE,
    header_of, round_up,
};

#[derive(Debug, Clone)]
enum Op {
    Alloc(u32),
    Free(Index),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1_u32..=3000).prop_map(Op::Alloc),
        any::<Index>().prop_map(Op::Free),
    ]
}

/// Runs `script`, checking every invariant after each step, then frees
/// everything that is still live.
fn run_script<I: FreeBlockIndex>(
    pages: u32,
    script: &[Op],
) -> Result<Allocator<I>, TestCaseError> {
    let config = HeapConfig::new().with_capacity(PAGE_SIZE * pages);
    let mut allocator = Allocator::<I>::new(config).unwrap();
    let mut live = Vec::<HeapAddr>::new();

    for op in script {
        match op {
            Op::Alloc(size) => {
                if let Some(payload) = allocator.mem_alloc(*size).unwrap() {
                    let block_size = allocator.heap().block_size(header_of(payload));
                    prop_assert!(block_size >= round_up(*size, 8) + 8);
                    prop_assert!(!live.contains(&payload));
                    live.push(payload);
                }
            }
            Op::Free(index) => {
                if !live.is_empty() {
                    let payload = live.swap_remove(index.index(live.len()));
                    allocator.mem_free(payload).unwrap();
                }
            }
        }
        prop_assert!(allocator.check_heap_correctness().is_ok());
        prop_assert!(allocator.heap().heap_size() <= allocator.config().capacity());
    }

    for payload in live {
        allocator.mem_free(payload).unwrap();
    }
    Ok(allocator)
}

fn assert_reduces_to_one_block<I: FreeBlockIndex>(
    pages: u32,
    script: &[Op],
) -> Result<(), TestCaseError> {
    let allocator = run_script::<I>(pages, script)?;
    prop_assert!(allocator.check_heap_correctness().is_ok());

    let stats = allocator.stats();
    prop_assert_eq!(stats.blocks, 1);
    prop_assert_eq!(stats.free_blocks, 1);
    prop_assert_eq!(stats.free_bytes, stats.heap_size - 16);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn implicit_scripts_keep_invariants(
        pages in 1_u32..=8,
        script in prop::collection::vec(op(), 1..200),
    ) {
        assert_reduces_to_one_block::<ImplicitList>(pages, &script)?;
    }

    #[test]
    fn explicit_scripts_keep_invariants(
        pages in 1_u32..=8,
        script in prop::collection::vec(op(), 1..200),
    ) {
        assert_reduces_to_one_block::<ExplicitList>(pages, &script)?;
    }
}
