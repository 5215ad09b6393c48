// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! kmerdht-cli — the driver that turns `kmerdht`'s distributed hash table
//! into a contig assembler: parses a k-mer file, shards it across ranks,
//! builds the table, walks every contig head to its tail, and writes the
//! result. Grounded directly on `original_source/kmer_hash.cpp`'s `main`.

mod contig;
mod input;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};

use kmerdht::kmer::KMER_LEN;
use kmerdht::substrate::thread::ThreadCluster;
use kmerdht::{Substrate, Table};

#[cfg(feature = "shm")]
use kmerdht::substrate::shm::ShmSubstrate;

/// How much contig-assembly detail to print, mirroring
/// `kmer_hash.cpp`'s `verbose`/`test`/(default) run-type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunType {
    /// Only the final "assembled in" summary line.
    Normal,
    /// Per-rank timing and contig/k-mer counts.
    Verbose,
    /// Writes `<prefix>_<rank>.dat`, one reconstructed contig per line.
    Test,
}

/// Distributed k-mer contig assembler over a one-sided RMA hash table.
#[derive(Parser, Debug)]
#[command(name = "kmerdht-cli")]
#[command(version)]
#[command(about = "Assemble contigs from a sharded k-mer file over a distributed hash table")]
struct Args {
    /// Path to the k-mer file.
    kmer_file: PathBuf,

    /// How much detail to print / whether to write contig files.
    #[arg(value_enum, default_value = "normal")]
    run_type: RunType,

    /// Output file prefix, used only when `run_type` is `test`.
    #[arg(default_value = "test")]
    prefix: String,

    /// Number of simulated ranks (OS threads in this process).
    ///
    /// Ignored when built with `--features shm`, where `--rank`/`--world-size`
    /// select this process's place in an externally-launched cluster instead.
    #[arg(short = 'n', long, default_value = "4")]
    ranks: usize,

    /// This process's rank within the cluster. Only meaningful with `--features shm`.
    #[arg(long, default_value = "0")]
    rank: usize,

    /// Total ranks in the cluster. Only meaningful with `--features shm`.
    #[arg(long, default_value = "1")]
    world_size: usize,

    /// Shared-memory session name joining this process to its cluster.
    /// Only meaningful with `--features shm`.
    #[arg(long, default_value = "kmerdht")]
    session: String,

    /// Raise log verbosity (can be repeated: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Lower log verbosity (can be repeated: -q, -qq).
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,
}

fn log_level(args: &Args) -> LevelFilter {
    let base = LevelFilter::Info as i8;
    let verbose = i8::try_from(args.verbose).unwrap_or(i8::MAX);
    let quiet = i8::try_from(args.quiet).unwrap_or(i8::MAX);
    let level = base.saturating_add(verbose).saturating_sub(quiet);
    match level.clamp(LevelFilter::Off as i8, LevelFilter::Trace as i8) {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level(&args).to_string()),
    )
    .format_timestamp_millis()
    .init();

    let file_kmer_len = input::kmer_len(&args.kmer_file)
        .with_context(|| format!("reading {}", args.kmer_file.display()))?;
    if file_kmer_len != KMER_LEN {
        bail!(
            "{} contains {}-mers, while this binary is compiled for {}-mers",
            args.kmer_file.display(),
            file_kmer_len,
            KMER_LEN
        );
    }

    let n_kmers = input::line_count(&args.kmer_file)?;
    let capacity = ((n_kmers as f64) / 0.5).ceil() as usize;
    info!("initializing hash table of size {capacity} for {n_kmers} kmers");

    #[cfg(feature = "shm")]
    {
        if args.world_size > 1 {
            return run_shm(&args, capacity);
        }
    }
    run_threaded(&args, capacity)
}

fn run_threaded(args: &Args, capacity: usize) -> Result<()> {
    let cluster = ThreadCluster::new(args.ranks);
    let kmer_file = args.kmer_file.clone();
    let run_type = args.run_type;
    let prefix = args.prefix.clone();
    let ranks = args.ranks;

    let results: Vec<Result<()>> = cluster.run(move |substrate| {
        let rank = substrate.rank();
        assemble(substrate, capacity, &kmer_file, ranks, rank, run_type, &prefix)
    });

    for r in results {
        r?;
    }
    Ok(())
}

#[cfg(feature = "shm")]
fn run_shm(args: &Args, capacity: usize) -> Result<()> {
    let substrate = ShmSubstrate::join(args.rank, args.world_size, &args.session)
        .map_err(|e| anyhow::anyhow!("joining shm cluster: {e}"))?;
    let result = assemble(
        substrate,
        capacity,
        &args.kmer_file,
        args.world_size,
        args.rank,
        args.run_type,
        &args.prefix,
    );
    result
}

fn assemble<S: kmerdht::Substrate>(
    substrate: S,
    capacity: usize,
    kmer_file: &std::path::Path,
    world_size: usize,
    rank: usize,
    run_type: RunType,
    prefix: &str,
) -> Result<()> {
    let mut table = Table::new(substrate, capacity);
    table.open_for_insert();

    let kmers = input::read_shard(kmer_file, world_size, rank)
        .with_context(|| format!("reading shard for rank {rank}"))?;
    if run_type == RunType::Verbose {
        info!("rank {rank}: finished reading kmers");
    }

    let start = Instant::now();
    let mut start_nodes = Vec::new();
    for kmer in &kmers {
        if !table.insert(*kmer) {
            bail!("HashMap is full");
        }
        if kmer.is_contig_head() {
            start_nodes.push(*kmer);
        }
    }
    let end_insert = Instant::now();

    let insert_time = (end_insert - start).as_secs_f64();
    if run_type != RunType::Test {
        info!("rank {rank}: finished inserting in {insert_time:.6}s");
    }

    table.open_for_find();

    let start_read = Instant::now();
    let contigs =
        contig::walk_all(&table, &start_nodes).map_err(|e| anyhow::anyhow!("{e}"))?;
    let end_read = Instant::now();

    let read_time = (end_read - start_read).as_secs_f64();
    let total_time = (end_read - start).as_secs_f64();
    let num_kmers: usize = contigs.iter().map(Vec::len).sum();

    if run_type != RunType::Test {
        info!("rank {rank}: assembled in {total_time:.6}s total");
    }
    if run_type == RunType::Verbose {
        info!(
            "rank {rank} reconstructed {} contigs with {num_kmers} nodes from {} start nodes ({read_time:.6} read, {insert_time:.6} insert, {total_time:.6} total)",
            contigs.len(),
            start_nodes.len()
        );
    }

    if run_type == RunType::Test {
        use std::io::Write as _;
        let path = format!("{prefix}_{rank}.dat");
        let mut out = std::fs::File::create(&path).with_context(|| format!("writing {path}"))?;
        for c in &contigs {
            writeln!(out, "{}", contig::extract_contig(c))?;
        }
    }

    Ok(())
}
