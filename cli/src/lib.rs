/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![deny(unreachable_patterns)]

use anyhow::{Context, Result};
use clap::Parser;
use dbgc_core::config::{Config, MemoryBudget};
use log::info;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod input;

use input::{check_inputs_exist, FileRecordSource};

/// Sets up env_logger with the `info` level as the default when `RUST_LOG`
/// is unset, matching the pipeline's "structured logging, no silent stages"
/// expectation.
pub fn init_env_logger() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "dbgc", version, about = "De Bruijn graph compaction pipeline.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: SubCommands,
}

#[derive(clap::Subcommand, Debug)]
pub enum SubCommands {
    /// Compacts a set of FASTA/FASTQ inputs into maximal unitigs.
    Build(BuildArgs),
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Input FASTA/FASTQ files, one source id assigned per file in order.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// k-mer length (odd, 3..=63).
    #[arg(long, default_value_t = 31)]
    pub k: usize,

    /// Minimizer length (<= k, <= 32).
    #[arg(long, default_value_t = 13)]
    pub l: usize,

    /// Number of subgraph buckets (power of two).
    #[arg(long = "subgraphs", default_value_t = 64)]
    pub num_subgraphs: usize,

    /// Number of atlases the subgraph buckets are grouped into.
    #[arg(long = "atlases", default_value_t = 8)]
    pub num_atlases: usize,

    /// Number of edge-matrix vertex partitions (power of two).
    #[arg(long = "partitions", default_value_t = 64)]
    pub num_partitions: usize,

    /// Total worker parallelism target.
    #[arg(long = "threads", default_value_t = 4)]
    pub num_threads: usize,

    /// Dedicated reader threads (2..=4).
    #[arg(long = "readers", default_value_t = 2)]
    pub num_readers: usize,

    /// Enables the optional color engine, assigning every unitig a
    /// source-color-set identifier.
    #[arg(long)]
    pub colored: bool,

    /// Soft/strict memory budget in GiB for simultaneously resident
    /// subgraph hash tables. Omit for an unrestricted (HLL-only) budget.
    #[arg(long = "memory-gib")]
    pub memory_gib: Option<f64>,

    /// Treats `--memory-gib` as a hard cap rather than advisory sizing.
    #[arg(long)]
    pub strict_memory: bool,

    /// Scratch directory for atlas buckets, the edge matrix, path-info
    /// buckets, diagonal-chain files, and color repositories.
    #[arg(long = "working-dir", default_value = "dbgc-work")]
    pub working_dir: PathBuf,

    /// Output prefix for the unitigs file (and, if colored, the colors
    /// file).
    #[arg(long = "output", default_value = "out")]
    pub output_prefix: PathBuf,

    /// Hash seed. Defaults to a value derived from the current time; pass
    /// explicitly to reproduce a prior run bit-for-bit.
    #[arg(long)]
    pub seed: Option<u64>,
}

fn default_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn build_config(args: &BuildArgs) -> Result<Config, dbgc_core::error::ValidationError> {
    let memory_budget = match args.memory_gib {
        Some(gib) => MemoryBudget::Bytes((gib * (1u64 << 30) as f64) as usize),
        None => MemoryBudget::Unrestricted,
    };
    Config::new(
        args.k,
        args.l,
        args.num_subgraphs,
        args.num_atlases,
        args.num_partitions,
        args.num_threads,
        args.num_readers,
        args.colored,
        memory_budget,
        args.strict_memory,
        args.working_dir.clone(),
        args.output_prefix.clone(),
        args.seed.unwrap_or_else(default_seed),
    )
}

fn run_build(args: BuildArgs) -> Result<()> {
    check_inputs_exist(&args.inputs)?;
    let cfg = build_config(&args).context("rejected configuration")?;

    let mut source = FileRecordSource::new(args.inputs.clone());
    let stats = dbgc_algo::pipeline::run_pipeline(&cfg, &mut source)?;

    info!(
        "wrote {} unitigs ({} trivial, {} stitched from lm-tigs)",
        stats.unitigs_written + stats.subgraph.trivial_unitigs,
        stats.subgraph.trivial_unitigs,
        stats.unitigs_written
    );
    if cfg.colored {
        info!("resolved {} color-shift vertices", stats.color_shift_vertices);
    }
    Ok(())
}

/// The entry point of the command-line interface.
pub fn cli_main<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let start = std::time::Instant::now();
    let cli = Cli::parse_from(args);
    match cli.command {
        SubCommands::Build(args) => run_build(args)?,
    }
    info!("the run took {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
