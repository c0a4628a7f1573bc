//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments
//! - runs the estimation / graph / synth pipelines
//! - prints reports and writes optional exports

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use log::{info, warn};

use crate::cli::{Command, EstimateArgs, GraphArgs, GraphOpts, InspectArgs, SynthArgs};
use crate::data::SynthConfig;
use crate::domain::{EstimateConfig, GraphConfig, PartitionSource, SolverOptions, StrandRange};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `skin` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Estimate(args) => handle_estimate(args),
        Command::Graph(args) => handle_graph(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_estimate(args: EstimateArgs) -> Result<(), AppError> {
    let config = estimate_config_from_args(&args)?;
    let cancel = interrupt_flag();
    let run = pipeline::run_estimate(&config, &cancel)?;

    println!("{}", crate::report::format_run_summary(&run.info, &run.summary));
    if !run.worst.is_empty() {
        println!("{}", crate::report::format_worst_strands(&run.worst));
    }

    // Optional exports.
    if let Some(path) = &config.export_csv {
        crate::io::write_weights_csv(path, &run.table)?;
        info!("Wrote per-strand CSV to {}", path.display());
    }
    if let Some(path) = &config.output {
        let file = crate::io::weight_file(run.table, &run.summary);
        crate::io::write_weight_json(path, &file)?;
        info!("Wrote weight table to {}", path.display());
    }

    Ok(())
}

fn handle_graph(args: GraphArgs) -> Result<(), AppError> {
    let graph_config = graph_config_from_args(&args.graph);
    let frames = crate::io::read_hair_cache(&args.input.cache, args.input.particles, args.input.first_strand)?;
    let graph = pipeline::build_strand_graph(&frames, &graph_config)?;

    let degrees: Vec<usize> = graph.adjacency().iter().map(Vec::len).collect();
    let isolated = degrees.iter().filter(|&&d| d == 0).count();
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    println!(
        "Strand graph: {} nodes, {} edges | max degree {max_degree} | {isolated} isolated",
        graph.node_count(),
        graph.edge_count()
    );

    if let Some(path) = &args.metis {
        crate::io::write_metis_graph(path, &graph, args.n_step)?;
    }
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<(), AppError> {
    let file = crate::io::read_weight_json(&args.weights)?;
    println!("Weights: {} ({}, task {})", args.weights.display(), file.generated, file.task);
    println!("{}", crate::report::format_table_stats(&crate::report::table_stats(&file.table)));

    let worst = crate::report::rank_strands_by_error(&file.table, args.top);
    if !worst.is_empty() {
        println!("{}", crate::report::format_worst_strands(&worst));
    }

    if let Some(path) = &args.truth {
        let truth = crate::io::read_weight_json(path)?;
        let cmp = crate::report::compare_to_truth(&file.table, &truth.table);
        print!("{}", crate::report::format_comparison(&cmp));
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let config = SynthConfig {
        strand_count: args.strands,
        particles_per_strand: args.particles,
        guide_every: args.guide_every,
        frame_count: args.frames,
        seed: args.seed,
        noise: args.noise,
        ..SynthConfig::default()
    };
    let (_, files) = pipeline::write_synth_dataset(&args.out_dir, &config)?;
    println!("cache:  {}", files.cache.display());
    println!("guides: {}", files.guides.display());
    println!("truth:  {}", files.truth.display());
    Ok(())
}

/// Flag raised by Ctrl-C; the estimator stops before its next strand and the
/// partial table is still reported and written.
fn interrupt_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Ctrl-C will not stop the run early: {e}");
    }
    cancel
}

pub fn graph_config_from_args(args: &GraphOpts) -> GraphConfig {
    GraphConfig {
        radius: args.radius,
        edge_threshold: args.edge_threshold,
        group_factor: args.group_factor,
        partition: match &args.partition {
            Some(path) => PartitionSource::File(path.clone()),
            None => PartitionSource::LabelPropagation {
                max_iterations: args.lpa_iters,
            },
        },
    }
}

pub fn estimate_config_from_args(args: &EstimateArgs) -> Result<EstimateConfig, AppError> {
    if args.input.particles == 0 {
        return Err(AppError::new(2, "Particles per strand must be > 0."));
    }
    if args.graph.group_factor == 0 {
        return Err(AppError::new(2, "Group factor must be >= 1."));
    }
    if !(args.ridge.is_finite() && args.ridge > 0.0) {
        return Err(AppError::new(2, "Ridge must be finite and > 0."));
    }
    if !(args.tolerance.is_finite() && args.tolerance > 0.0 && args.singular_tol.is_finite() && args.singular_tol > 0.0) {
        return Err(AppError::new(2, "Solver tolerances must be finite and > 0."));
    }

    let task = match (args.task_start, args.task_end) {
        (None, None) => None,
        (start, end) => {
            let start = start.unwrap_or(args.input.first_strand);
            let Some(end) = end else {
                return Err(AppError::new(2, "--task-start needs --task-end."));
            };
            if end <= start {
                return Err(AppError::new(2, format!("Empty task [{start}, {end}).")));
            }
            Some(StrandRange::new(start, end))
        }
    };

    Ok(EstimateConfig {
        cache_path: args.input.cache.clone(),
        guides_path: args.guides.clone(),
        reference_path: args.reference.clone(),
        reference_frame: args.reference_frame,
        particles_per_strand: args.input.particles,
        first_strand: args.input.first_strand,
        graph: graph_config_from_args(&args.graph),
        solver: SolverOptions {
            max_iterations: args.max_iters,
            tolerance: args.tolerance,
            singular_tolerance: args.singular_tol,
            ridge: args.ridge,
        },
        task,
        workers: args.workers,
        chunk_size: args.chunk.max(1),
        output: args.out.clone(),
        export_csv: args.export_csv.clone(),
        top_n: args.top,
        progress: !args.no_progress,
    })
}

/// Rewrite argv so `skin --cache ...` means `skin estimate --cache ...`.
///
/// Rules:
/// - `skin --help/--version/-h`  -> unchanged (show top-level help/version)
/// - `skin <subcommand> ...`     -> unchanged
/// - `skin --flag ...`           -> `skin estimate --flag ...`
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "estimate" | "graph" | "inspect" | "synth");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "estimate flags".
    if arg1.starts_with('-') {
        argv.insert(1, "estimate".to_string());
        return argv;
    }

    // Otherwise, leave as-is.
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_starts_lowered_even_when_a_handler_exists() {
        // The second registration fails; the run must still get a usable flag.
        for _ in 0..2 {
            let flag = interrupt_flag();
            assert!(!flag.load(Ordering::Relaxed));
        }
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_flags_default_to_estimate() {
        assert_eq!(
            rewrite_args(argv(&["skin", "--cache", "a.cache"])),
            argv(&["skin", "estimate", "--cache", "a.cache"])
        );
        assert_eq!(rewrite_args(argv(&["skin", "synth", "--out-dir", "x"]))[1], "synth");
        assert_eq!(rewrite_args(argv(&["skin", "--help"])), argv(&["skin", "--help"]));
        assert_eq!(rewrite_args(argv(&["skin"])), argv(&["skin"]));
    }

    fn parse(args: &[&str]) -> EstimateArgs {
        match crate::cli::Cli::parse_from(rewrite_args(argv(args))).command {
            Command::Estimate(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn estimate_flags_become_config() {
        let args = parse(&[
            "skin",
            "--cache",
            "hair.cache",
            "--guides",
            "g.gmot",
            "--first-strand",
            "100",
            "--task-end",
            "150",
            "--partition",
            "part.txt",
            "--group-factor",
            "4",
            "--workers",
            "3",
        ]);
        let config = estimate_config_from_args(&args).unwrap();

        assert_eq!(config.first_strand, 100);
        assert_eq!(config.task, Some(StrandRange::new(100, 150)));
        assert_eq!(config.graph.partition, PartitionSource::File("part.txt".into()));
        assert_eq!(config.graph.group_factor, 4);
        assert_eq!(config.workers, 3);
        assert_eq!(config.particles_per_strand, 25);
        assert_eq!(config.solver, SolverOptions::default());
        assert!(config.progress);
    }

    #[test]
    fn invalid_task_is_a_config_error() {
        let args = parse(&["skin", "--cache", "c", "--guides", "g", "--task-start", "9", "--task-end", "3"]);
        assert_eq!(estimate_config_from_args(&args).unwrap_err().exit_code(), 2);

        let args = parse(&["skin", "--cache", "c", "--guides", "g", "--task-start", "9"]);
        assert_eq!(estimate_config_from_args(&args).unwrap_err().exit_code(), 2);
    }
}
