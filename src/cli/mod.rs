//! Command-line parsing for the strand skinning weight estimator.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the estimation code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "skin", version, about = "Hair strand skinning weight estimator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Estimate blend weights of every ordinary strand and write the weight table.
    Estimate(EstimateArgs),
    /// Build the proximity graph only: print its statistics, optionally export it for METIS.
    Graph(GraphArgs),
    /// Summarize a saved weight table, optionally against known weights.
    Inspect(InspectArgs),
    /// Write a synthetic hair cache, guide table and ground-truth weights.
    Synth(SynthArgs),
}

/// Where the animation comes from.
#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    /// Binary hair cache (rigid motion, positions, directions per frame).
    #[arg(long, value_name = "FILE")]
    pub cache: PathBuf,

    /// Particles per strand.
    #[arg(long, default_value_t = crate::domain::DEFAULT_PARTICLES_PER_STRAND)]
    pub particles: usize,

    /// Global index of the first strand stored in the cache.
    #[arg(long, default_value_t = 0)]
    pub first_strand: usize,
}

/// Proximity graph and grouping options.
#[derive(Debug, Args, Clone)]
pub struct GraphOpts {
    /// Neighbour radius in cache units.
    #[arg(long, default_value_t = 0.6)]
    pub radius: f64,

    /// Keep particle pairs that were neighbours in at least this many frames.
    #[arg(long, default_value_t = 1.0)]
    pub edge_threshold: f64,

    /// Merge this many consecutive strands into one node before partitioning.
    #[arg(long, default_value_t = 1)]
    pub group_factor: usize,

    /// METIS partition file (one group per coarse node); label propagation when absent.
    #[arg(long, value_name = "FILE")]
    pub partition: Option<PathBuf>,

    /// Label propagation sweep limit.
    #[arg(long, default_value_t = 50)]
    pub lpa_iters: usize,
}

#[derive(Debug, Args, Clone)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub input: CacheArgs,

    /// Guide motion table.
    #[arg(long, value_name = "FILE")]
    pub guides: PathBuf,

    /// Separate cache holding the reference pose (defaults to the animation cache).
    #[arg(long, value_name = "FILE")]
    pub reference: Option<PathBuf>,

    /// Frame of the reference cache used as the rest pose.
    #[arg(long, default_value_t = 0)]
    pub reference_frame: usize,

    #[command(flatten)]
    pub graph: GraphOpts,

    /// First strand of the task (defaults to the first strand of the cache).
    #[arg(long)]
    pub task_start: Option<usize>,

    /// One past the last strand of the task (defaults to the end of the cache).
    #[arg(long)]
    pub task_end: Option<usize>,

    /// Worker threads (0 = one per core).
    #[arg(long, env = "SKIN_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Strands per parallel work item.
    #[arg(long, default_value_t = 64)]
    pub chunk: usize,

    /// Active-set iteration budget per strand.
    #[arg(long, default_value_t = 500)]
    pub max_iters: usize,

    /// Active-set step/multiplier tolerance.
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Relative reciprocal condition below which a face system counts as singular.
    #[arg(long, default_value_t = 1e-13)]
    pub singular_tol: f64,

    /// Relative ridge added to AAT for the retry of singular strands.
    #[arg(long, default_value_t = 1e-8)]
    pub ridge: f64,

    /// Write the weight table as JSON.
    #[arg(long, value_name = "JSON")]
    pub out: Option<PathBuf>,

    /// Export one CSV row per strand.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Show the N strands with the largest remaining error.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Log progress lines instead of drawing a progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Args, Clone)]
pub struct GraphArgs {
    #[command(flatten)]
    pub input: CacheArgs,

    #[command(flatten)]
    pub graph: GraphOpts,

    /// Write the coarse strand graph in METIS format.
    #[arg(long, value_name = "FILE")]
    pub metis: Option<PathBuf>,

    /// Number of integer weight levels in the METIS export.
    #[arg(long, default_value_t = 10)]
    pub n_step: u32,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Weight table JSON produced by `skin estimate --out`.
    #[arg(long, value_name = "JSON")]
    pub weights: PathBuf,

    /// Known weights to compare against (e.g. `truth.json` from `skin synth`).
    #[arg(long, value_name = "JSON")]
    pub truth: Option<PathBuf>,

    /// Show the N strands with the largest remaining error.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Output directory (created if missing).
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[arg(long, default_value_t = 64)]
    pub strands: usize,

    #[arg(long, default_value_t = crate::domain::DEFAULT_PARTICLES_PER_STRAND)]
    pub particles: usize,

    /// Every N-th strand is a guide.
    #[arg(long, default_value_t = 4)]
    pub guide_every: usize,

    #[arg(long, default_value_t = 12)]
    pub frames: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of the position noise on ordinary strands.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,
}
