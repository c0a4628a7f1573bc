//! Shared estimation pipeline used by the CLI subcommands and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load cache + guides -> proximity graph -> grouping -> parallel per-strand solve
//!
//! The CLI can then focus on presentation and exports.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use log::{info, warn};

use crate::data::{SynthConfig, SynthDataset, generate};
use crate::domain::{
    EstimateConfig, GraphConfig, GuideMotionTable, HairFrames, PartitionSource, ReferencePose, StrandRange,
    WeightTable,
};
use crate::error::AppError;
use crate::fit::{BarProgress, BatchEstimator, BatchSummary, LogProgress, ProgressObserver, SkinningContext, StrandSolver};
use crate::graph::{ProximityGraph, StrandGrouping, label_propagation};
use crate::io::{read_guide_table, read_hair_cache, read_partition, reference_from};
use crate::report::{RunInfo, StrandError, rank_strands_by_error};

/// Animation, rest pose and guide motions of one run.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub frames: HairFrames,
    pub reference: ReferencePose,
    pub guides: GuideMotionTable,
}

/// All computed outputs of a single `skin estimate` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub info: RunInfo,
    pub summary: BatchSummary,
    pub table: WeightTable,
    pub worst: Vec<StrandError>,
}

/// Load and cross-check the animation cache, reference pose and guide table.
pub fn load_inputs(config: &EstimateConfig) -> Result<Inputs, AppError> {
    let npar = config.particles_per_strand;
    let frames = read_hair_cache(&config.cache_path, npar, config.first_strand)?;

    let reference = match &config.reference_path {
        Some(path) => reference_from(&read_hair_cache(path, npar, config.first_strand)?, config.reference_frame)?,
        None => reference_from(&frames, config.reference_frame)?,
    };
    if reference.layout != frames.layout {
        return Err(AppError::new(
            2,
            format!(
                "Reference pose covers {} strands, the animation {}.",
                reference.layout.strand_count, frames.layout.strand_count
            ),
        ));
    }

    let guides = read_guide_table(&config.guides_path)?;
    check_guides(&guides, &frames)?;

    Ok(Inputs {
        frames,
        reference,
        guides,
    })
}

fn check_guides(guides: &GuideMotionTable, frames: &HairFrames) -> Result<(), AppError> {
    if guides.particles_per_strand != frames.layout.particles_per_strand {
        return Err(AppError::new(
            2,
            format!(
                "Guide table has {} particles per strand, the cache {}.",
                guides.particles_per_strand, frames.layout.particles_per_strand
            ),
        ));
    }
    if guides.frame_count() != frames.len() {
        return Err(AppError::new(
            2,
            format!(
                "Guide table has {} frames, the cache {}.",
                guides.frame_count(),
                frames.len()
            ),
        ));
    }
    if let Some(&g) = guides.guides().iter().find(|&&g| !frames.layout.contains(g)) {
        return Err(AppError::new(2, format!("Guide strand {g} is not in the cache.")));
    }
    Ok(())
}

/// Particle proximity graph, filtered and coarsened to (groups of) strands.
pub fn build_strand_graph(frames: &HairFrames, config: &GraphConfig) -> Result<ProximityGraph, AppError> {
    let particles = ProximityGraph::from_frames(frames, config.radius)?;
    info!(
        "Particle graph: {} nodes, {} edges within radius {}",
        particles.node_count(),
        particles.edge_count(),
        config.radius
    );

    let strands = particles
        .filter(config.edge_threshold)
        .coarsen(frames.layout.particles_per_strand)?;
    if config.group_factor > 1 {
        Ok(strands.coarsen(config.group_factor)?)
    } else {
        Ok(strands)
    }
}

pub fn build_grouping(
    inputs: &Inputs,
    graph: &ProximityGraph,
    config: &GraphConfig,
) -> Result<StrandGrouping, AppError> {
    let partition = match &config.partition {
        PartitionSource::LabelPropagation { max_iterations } => label_propagation(graph, *max_iterations),
        PartitionSource::File(path) => read_partition(path)?,
    };
    Ok(StrandGrouping::from_partition(
        &inputs.frames.layout,
        &partition,
        config.group_factor.max(1),
        &inputs.guides,
    )?)
}

/// Execute the full estimation pipeline and return the computed outputs.
pub fn run_estimate(config: &EstimateConfig, cancel: &AtomicBool) -> Result<RunOutput, AppError> {
    let inputs = load_inputs(config)?;
    let graph = build_strand_graph(&inputs.frames, &config.graph)?;
    let grouping = build_grouping(&inputs, &graph, &config.graph)?;
    estimate_with(config, &inputs, &graph, &grouping, cancel)
}

/// Run the solver over the configured task with already-built inputs and grouping.
pub fn estimate_with(
    config: &EstimateConfig,
    inputs: &Inputs,
    graph: &ProximityGraph,
    grouping: &StrandGrouping,
    cancel: &AtomicBool,
) -> Result<RunOutput, AppError> {
    let layout = inputs.frames.layout;
    let task = config
        .task
        .unwrap_or_else(|| StrandRange::new(layout.first_strand, layout.end_strand()));
    if task.start < layout.first_strand || task.end > layout.end_strand() {
        return Err(AppError::new(
            2,
            format!(
                "Task {task} is outside the cached strands [{}, {}).",
                layout.first_strand,
                layout.end_strand()
            ),
        ));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| AppError::new(2, format!("Failed to start worker pool: {e}")))?;

    let ctx = SkinningContext::new(&inputs.reference, &inputs.frames, &inputs.guides);
    let estimator = BatchEstimator::new(StrandSolver::active_set(ctx, config.solver), grouping);
    let observer: Box<dyn ProgressObserver> = if config.progress {
        Box::new(BarProgress::new())
    } else {
        Box::new(LogProgress::new(10.0))
    };

    let mut table = WeightTable::new(layout.particles_per_strand, layout.end_strand());
    let summary = pool.install(|| estimator.run_parallel(task, &mut table, config.chunk_size, observer.as_ref(), cancel))?;

    info!(
        "Task {task}: {} solved, {} failed, {} guides, error {:.6e} -> {:.6e}",
        summary.succeeded, summary.failed, summary.guides, summary.error0, summary.error
    );
    if summary.failed > 0 {
        warn!("{} strands could not be solved and are marked unsolved", summary.failed);
    }
    if !summary.is_complete() {
        warn!(
            "Estimation stopped after {} of {} strands; the rest stay pending",
            summary.processed,
            task.len()
        );
    }

    let info = RunInfo {
        frames: inputs.frames.len(),
        strands: layout.strand_count,
        particles_per_strand: layout.particles_per_strand,
        first_strand: layout.first_strand,
        guides: inputs.guides.guides().len(),
        graph_nodes: graph.node_count(),
        graph_edges: graph.edge_count(),
        groups: grouping.group_count(),
        max_candidates: grouping.max_candidates(),
        workers: pool.current_num_threads(),
    };
    let worst = rank_strands_by_error(&table, config.top_n);

    Ok(RunOutput {
        info,
        summary,
        table,
        worst,
    })
}

/// Files written by [`write_synth_dataset`].
#[derive(Debug, Clone)]
pub struct SynthFiles {
    pub cache: PathBuf,
    pub guides: PathBuf,
    pub truth: PathBuf,
}

/// Generate a synthetic dataset and write cache, guide table and truth into `dir`.
pub fn write_synth_dataset(dir: &Path, config: &SynthConfig) -> Result<(SynthDataset, SynthFiles), AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", dir.display())))?;
    let dataset = generate(config)?;

    let files = SynthFiles {
        cache: dir.join("hair.cache"),
        guides: dir.join("guides.gmot"),
        truth: dir.join("truth.json"),
    };
    crate::io::write_hair_cache(&files.cache, &dataset.frames)?;
    crate::io::write_guide_table(&files.guides, &dataset.guides)?;

    let table = dataset.truth_table();
    let mut summary = BatchSummary::empty(StrandRange::new(0, table.len()));
    summary.guides = dataset.guides.guides().len();
    summary.succeeded = table.solved().count();
    crate::io::write_weight_json(&files.truth, &crate::io::weight_file(table, &summary))?;

    info!(
        "Wrote synthetic dataset ({} strands, {} guides, {} frames) to {}",
        config.strand_count,
        summary.guides,
        config.frame_count,
        dir.display()
    );
    Ok((dataset, files))
}
