#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::{process, str::FromStr};

use argh::FromArgs;
use log::LevelFilter;
use snafu::{OptionExt as _, Report, ResultExt as _, Whatever};
use tagheap::{Allocator, ExplicitList, FreeBlockIndex, HeapConfig, ImplicitList, PAGE_SIZE};

use self::workload::Workload;

mod logger;
mod workload;

/// Run a randomized mem_alloc/mem_free workload against a simulated heap.
#[derive(Debug, FromArgs)]
struct Args {
    /// free block strategy, `implicit` or `explicit` (default: explicit)
    #[argh(option, default = "Strategy::Explicit")]
    strategy: Strategy,
    /// number of alloc/free operations (default: 50000)
    #[argh(option, default = "50_000")]
    operations: usize,
    /// largest request size in bytes (default: 1024)
    #[argh(option, default = "1024")]
    max_request: u32,
    /// random seed (default: 123456)
    #[argh(option, default = "123_456")]
    seed: u64,
    /// heap capacity in 4 KiB pages (default: 8)
    #[argh(option, default = "8")]
    pages: u32,
    /// check every heap invariant after each operation
    #[argh(switch)]
    verify: bool,
    /// print every block of the heap before freeing the survivors
    #[argh(switch)]
    dump: bool,
    /// maximum log level (default: info)
    #[argh(option, default = "LevelFilter::Info")]
    log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
enum Strategy {
    #[display("implicit")]
    Implicit,
    #[display("explicit")]
    Explicit,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("unknown strategy `{input}`, expected `implicit` or `explicit`")]
struct ParseStrategyError {
    input: String,
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "implicit" => Ok(Self::Implicit),
            "explicit" => Ok(Self::Explicit),
            _ => Err(ParseStrategyError {
                input: s.to_owned(),
            }),
        }
    }
}

fn main() {
    let args: Args = argh::from_env();
    logger::init(args.log_level);

    if let Err(err) = run(&args) {
        let report = Report::from_error(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Whatever> {
    match args.strategy {
        Strategy::Implicit => run_with::<ImplicitList>(args),
        Strategy::Explicit => run_with::<ExplicitList>(args),
    }
}

fn run_with<I>(args: &Args) -> Result<(), Whatever>
where
    I: FreeBlockIndex,
{
    let capacity = args
        .pages
        .checked_mul(PAGE_SIZE)
        .whatever_context("heap capacity overflows u32")?;
    let config = HeapConfig::new()
        .with_capacity(capacity)
        .with_verification(args.verify);
    let allocator = Allocator::<I>::new(config).whatever_context("invalid heap configuration")?;

    log::info!(
        "running {} operations, strategy={}, capacity={capacity}, seed={}",
        args.operations,
        args.strategy,
        args.seed
    );

    let mut workload = Workload::new(allocator, args.seed, args.max_request);
    workload
        .run(args.operations)
        .whatever_context("workload failed")?;

    if args.dump {
        print!("{}", workload.allocator().heap().dump());
    }
    let summary = workload
        .finish()
        .whatever_context("failed to release surviving blocks")?;

    println!("{summary}");
    Ok(())
}
