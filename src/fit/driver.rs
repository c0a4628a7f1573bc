//! Batch estimation over a task of strands.
//!
//! A task is a contiguous [`StrandRange`]; slot `i` of the task's slice of the
//! weight table belongs to strand `task.start + i`. Parallel runs split that
//! slice into disjoint chunks, each with its own normal-equation cache, so the
//! only shared state is read-only input data.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use rayon::prelude::*;

use crate::domain::{StrandRange, WeightEntry, WeightTable};
use crate::fit::progress::{ProgressObserver, StrandStatus};
use crate::fit::solver::{SolveError, StrandSolver};
use crate::fit::system::NormalEquationCache;
use crate::graph::StrandGrouping;
use crate::math::{ActiveSetSolver, QpSolver};

/// Totals of one (possibly partial) batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub task: StrandRange,
    /// Sum of the uniform-weight errors of the solved strands.
    pub error0: f64,
    /// Sum of the solved errors.
    pub error: f64,
    pub succeeded: usize,
    pub failed: usize,
    pub guides: usize,
    pub processed: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn empty(task: StrandRange) -> Self {
        Self {
            task,
            error0: 0.0,
            error: 0.0,
            succeeded: 0,
            failed: 0,
            guides: 0,
            processed: 0,
            cancelled: false,
        }
    }

    /// Fold the summary of an adjacent sub-task into this one.
    pub fn merge(&mut self, other: &BatchSummary) {
        self.task = StrandRange::new(self.task.start.min(other.task.start), self.task.end.max(other.task.end));
        self.error0 += other.error0;
        self.error += other.error;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.guides += other.guides;
        self.processed += other.processed;
        self.cancelled |= other.cancelled;
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.processed == self.task.len()
    }
}

/// Runs the per-strand solver over tasks and fills the weight table.
pub struct BatchEstimator<'a, S: QpSolver = ActiveSetSolver> {
    solver: StrandSolver<'a, S>,
    grouping: &'a StrandGrouping,
}

impl<'a, S: QpSolver> BatchEstimator<'a, S> {
    pub fn new(solver: StrandSolver<'a, S>, grouping: &'a StrandGrouping) -> Self {
        Self { solver, grouping }
    }

    /// Process `task` sequentially, writing into `slots` (`slots[i]` ↔ `task.start + i`).
    ///
    /// `should_stop` is checked before every strand; once it returns `true` the
    /// remaining slots stay untouched and the summary is marked cancelled.
    /// Per-strand numerical failures are recorded as [`WeightEntry::Unsolved`];
    /// fatal errors abort the task.
    pub fn run_task(
        &self,
        task: StrandRange,
        slots: &mut [WeightEntry],
        cache: &mut NormalEquationCache,
        observer: &dyn ProgressObserver,
        should_stop: &dyn Fn() -> bool,
    ) -> Result<BatchSummary, SolveError> {
        if slots.len() != task.len() {
            return Err(SolveError::MissingData(format!(
                "task {task} has {} strands but {} result slots",
                task.len(),
                slots.len()
            )));
        }

        let ctx = self.solver.context();
        let mut summary = BatchSummary::empty(task);

        for (strand, slot) in task.iter().zip(slots.iter_mut()) {
            if should_stop() {
                summary.cancelled = true;
                break;
            }

            let status = if ctx.is_guide(strand) {
                *slot = WeightEntry::Guide;
                summary.guides += 1;
                StrandStatus::Guide
            } else {
                let candidates = self
                    .grouping
                    .candidates(strand)
                    .map_err(|e| SolveError::MissingData(e.to_string()))?;

                match self.solver.solve(strand, candidates, cache) {
                    Ok(fit) => {
                        summary.error0 += fit.error0;
                        summary.error += fit.error;
                        summary.succeeded += 1;
                        *slot = WeightEntry::Solved(fit.into_weights());
                        StrandStatus::Solved
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Strand {strand} left unsolved: {e}");
                        summary.failed += 1;
                        *slot = WeightEntry::Unsolved { reason: e.to_string() };
                        StrandStatus::Failed
                    }
                }
            };

            summary.processed += 1;
            observer.strand_done(strand, status);
        }

        Ok(summary)
    }

    /// Process `task` on the current rayon pool, `chunk_size` strands per work item.
    ///
    /// Setting `cancel` stops every worker before its next strand. A fatal
    /// error in one chunk stops the others the same way and is returned.
    /// Totals are merged in task order, so they do not depend on scheduling.
    pub fn run_parallel(
        &self,
        task: StrandRange,
        table: &mut WeightTable,
        chunk_size: usize,
        observer: &dyn ProgressObserver,
        cancel: &AtomicBool,
    ) -> Result<BatchSummary, SolveError> {
        let table_len = table.len();
        let slots = table.slots_mut(task).ok_or_else(|| {
            SolveError::MissingData(format!("task {task} runs past the weight table ({table_len} strands)"))
        })?;

        let chunk_size = chunk_size.max(1);
        let abort = AtomicBool::new(false);
        let should_stop = || cancel.load(Ordering::Relaxed) || abort.load(Ordering::Relaxed);

        info!(
            "Estimating {} strands of task {task} in chunks of {chunk_size} on {} threads",
            task.len(),
            rayon::current_num_threads()
        );
        observer.start(task.len());

        let results: Vec<Result<BatchSummary, SolveError>> = slots
            .par_chunks_mut(chunk_size)
            .zip(task.chunks(chunk_size))
            .map(|(chunk, sub)| {
                let mut cache = NormalEquationCache::new();
                let result = self.run_task(sub, chunk, &mut cache, observer, &should_stop);
                if result.is_err() {
                    abort.store(true, Ordering::Relaxed);
                }
                result
            })
            .collect();

        observer.finish();

        let mut summary = BatchSummary::empty(task);
        for result in results {
            summary.merge(&result?);
        }
        summary.task = task;
        Ok(summary)
    }
}
