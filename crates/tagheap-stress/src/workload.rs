use std::fmt;

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use snafu::{Location, ResultExt as _, Snafu, ensure};
use tagheap::{Allocator, AllocatorError, FreeBlockIndex, HeapAddr, HeapCheckError, HeapStats};

#[derive(Debug, Snafu)]
pub enum WorkloadError {
    #[snafu(display("allocator failed at operation {op}"))]
    Allocator {
        op: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: AllocatorError,
    },
    #[snafu(display("payload overwritten while allocated: payload={payload}, op={op}"))]
    PayloadOverwritten {
        payload: HeapAddr,
        op: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap check failed"))]
    Check {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: HeapCheckError,
    },
    #[snafu(display("heap did not reduce to a single free block: blocks={blocks}"))]
    Fragmented {
        blocks: u32,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy)]
struct Live {
    payload: HeapAddr,
    size: u32,
    fill: u8,
}

/// Randomized sequence of `mem_alloc` and `mem_free` calls.
///
/// Each step allocates or frees with equal probability. Every allocated
/// payload is filled with a per-allocation byte that is verified right
/// before the block is freed.
pub struct Workload<I> {
    allocator: Allocator<I>,
    rng: StdRng,
    max_request: u32,
    live: Vec<Live>,
    op: usize,
    allocs: usize,
    frees: usize,
    exhausted: usize,
    peak_live: usize,
    peak_heap_size: u32,
}

impl<I> Workload<I>
where
    I: FreeBlockIndex,
{
    pub fn new(allocator: Allocator<I>, seed: u64, max_request: u32) -> Self {
        let peak_heap_size = allocator.heap().heap_size();
        Self {
            allocator,
            rng: StdRng::seed_from_u64(seed),
            max_request: max_request.max(1),
            live: Vec::new(),
            op: 0,
            allocs: 0,
            frees: 0,
            exhausted: 0,
            peak_live: 0,
            peak_heap_size,
        }
    }

    pub fn allocator(&self) -> &Allocator<I> {
        &self.allocator
    }

    /// Runs `operations` more random steps.
    pub fn run(&mut self, operations: usize) -> Result<(), WorkloadError> {
        let report_every = (operations / 10).max(1);
        for _ in 0..operations {
            if self.live.is_empty() || self.rng.random_bool(0.5) {
                self.alloc()?;
            } else {
                let index = self.rng.random_range(0..self.live.len());
                let victim = self.live.swap_remove(index);
                self.free(victim)?;
            }

            self.op += 1;
            if self.op % report_every == 0 {
                log::debug!(
                    "op {}: live={}, heap_size={}",
                    self.op,
                    self.live.len(),
                    self.allocator.heap().heap_size()
                );
            }
        }
        Ok(())
    }

    /// Frees every surviving block and checks that the heap collapsed back
    /// into one free block.
    pub fn finish(mut self) -> Result<Summary, WorkloadError> {
        let survivors = self.live.len();
        while let Some(victim) = self.live.pop() {
            self.free(victim)?;
        }

        self.allocator.check_heap_correctness().context(CheckSnafu)?;
        let stats = self.allocator.stats();
        ensure!(
            stats.blocks == 1 && stats.free_blocks == 1,
            FragmentedSnafu {
                blocks: stats.blocks
            }
        );

        Ok(Summary {
            strategy: I::NAME,
            operations: self.op,
            allocs: self.allocs,
            frees: self.frees,
            exhausted: self.exhausted,
            survivors,
            peak_live: self.peak_live,
            peak_heap_size: self.peak_heap_size,
            stats,
        })
    }

    fn alloc(&mut self) -> Result<(), WorkloadError> {
        let op = self.op;
        let size = self.rng.random_range(1..=self.max_request);
        let Some(payload) = self.allocator.mem_alloc(size).context(AllocatorSnafu { op })? else {
            self.exhausted += 1;
            return Ok(());
        };

        #[expect(clippy::cast_possible_truncation)]
        let fill = op as u8;
        self.allocator
            .payload_mut(payload)
            .context(AllocatorSnafu { op })?
            .fill(fill);

        self.live.push(Live {
            payload,
            size,
            fill,
        });
        self.allocs += 1;
        self.peak_live = self.peak_live.max(self.live.len());
        self.peak_heap_size = self.peak_heap_size.max(self.allocator.heap().heap_size());
        Ok(())
    }

    fn free(&mut self, victim: Live) -> Result<(), WorkloadError> {
        let op = self.op;
        let Live {
            payload,
            size,
            fill,
        } = victim;

        let bytes = self
            .allocator
            .payload(payload)
            .context(AllocatorSnafu { op })?;
        ensure!(
            bytes[..size as usize].iter().all(|&b| b == fill),
            PayloadOverwrittenSnafu { payload, op }
        );

        self.allocator
            .mem_free(payload)
            .context(AllocatorSnafu { op })?;
        self.frees += 1;
        Ok(())
    }
}

/// Outcome of a finished [`Workload`].
#[derive(Debug)]
pub struct Summary {
    strategy: &'static str,
    operations: usize,
    allocs: usize,
    frees: usize,
    exhausted: usize,
    survivors: usize,
    peak_live: usize,
    peak_heap_size: u32,
    stats: HeapStats,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "strategy:         {}", self.strategy)?;
        writeln!(f, "operations:       {}", self.operations)?;
        writeln!(
            f,
            "allocations:      {} ({} out of heap)",
            self.allocs, self.exhausted
        )?;
        writeln!(
            f,
            "frees:            {} ({} at the end)",
            self.frees, self.survivors
        )?;
        writeln!(f, "peak live blocks: {}", self.peak_live)?;
        writeln!(f, "peak heap size:   {}", self.peak_heap_size)?;
        write!(f, "{}", self.stats)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use tagheap::{ExplicitList, HeapConfig, ImplicitList};

    use super::*;

    fn workload<I: FreeBlockIndex>(seed: u64) -> Workload<I> {
        let config = HeapConfig::new().with_verification(true);
        Workload::new(Allocator::new(config).unwrap(), seed, 1024)
    }

    #[test]
    fn test_implicit_workload_collapses() {
        let mut workload = workload::<ImplicitList>(1);
        workload.run(5_000).unwrap();
        let summary = workload.finish().unwrap();
        assert_eq!(summary.operations, 5_000);
        assert_eq!(summary.allocs, summary.frees);
        assert_eq!(summary.stats.free_blocks, 1);
    }

    #[test]
    fn test_explicit_workload_collapses() {
        let mut workload = workload::<ExplicitList>(2);
        workload.run(5_000).unwrap();
        let summary = workload.finish().unwrap();
        assert_eq!(summary.allocs, summary.frees);
        assert!(summary.peak_heap_size >= summary.stats.heap_size);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let run = |seed| {
            let mut workload = workload::<ExplicitList>(seed);
            workload.run(2_000).unwrap();
            let summary = workload.finish().unwrap();
            (summary.allocs, summary.exhausted, summary.peak_heap_size)
        };
        assert_eq!(run(7), run(7));
    }
}
