#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use tagheap::{Allocator, ExplicitList, FreeBlockIndex, HeapAddr, HeapConfig, ImplicitList};

const OPERATIONS: usize = 50_000;
const MAX_REQUEST: u32 = 1024;
const CHECK_INTERVAL: usize = 500;

#[derive(Debug, Clone, Copy)]
struct Live {
    payload: HeapAddr,
    size: u32,
    fill: u8,
}

fn stress<I: FreeBlockIndex>(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut allocator = Allocator::<I>::new(HeapConfig::new()).unwrap();
    let mut live = Vec::<Live>::new();

    for op in 0..OPERATIONS {
        if live.is_empty() || rng.random_bool(0.5) {
            let size = rng.random_range(1..=MAX_REQUEST);
            // exhaustion is expected once the live set nears capacity
            if let Some(payload) = allocator.mem_alloc(size).unwrap() {
                #[expect(clippy::cast_possible_truncation)]
                let fill = op as u8;
                let bytes = allocator.payload_mut(payload).unwrap();
                assert!(bytes.len() >= size as usize);
                bytes.fill(fill);
                live.push(Live {
                    payload,
                    size,
                    fill,
                });
            }
        } else {
            let victim = live.swap_remove(rng.random_range(0..live.len()));
            let bytes = allocator.payload(victim.payload).unwrap();
            assert!(
                bytes[..victim.size as usize].iter().all(|&b| b == victim.fill),
                "payload of {} was overwritten",
                victim.payload
            );
            allocator.mem_free(victim.payload).unwrap();
        }

        if op % CHECK_INTERVAL == 0 {
            allocator.check_heap_correctness().unwrap();
        }
    }

    for victim in live {
        allocator.mem_free(victim.payload).unwrap();
    }
    allocator.check_heap_correctness().unwrap();

    let heap_size = allocator.heap().heap_size();
    let blocks = allocator.blocks().collect::<Vec<_>>();
    assert_eq!(blocks.len(), 1);
    assert!(!blocks[0].allocated);
    assert_eq!(blocks[0].size, heap_size - 16);
}

#[test]
fn test_implicit_stress() {
    stress::<ImplicitList>(123_456);
}

#[test]
fn test_explicit_stress() {
    stress::<ExplicitList>(123_456);
}

#[test]
fn test_explicit_stress_other_seed() {
    stress::<ExplicitList>(0xdead_beef);
}
