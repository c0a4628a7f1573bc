//! Per-strand blend weight solve.
//!
//! Given a strand and its candidate guides we:
//! - fetch (or assemble) the strand's normal equations
//! - minimize `E(x)` over the simplex, starting from uniform weights
//! - retry once with a small ridge on `AAT` if the reduced systems are singular
//! - clamp round-off negatives to zero and renormalize so the weights still sum to one
//!
//! The solved weights are never worse than the uniform start: if clean-up
//! pushes the error above the baseline, the uniform weights are kept.

use log::debug;
use nalgebra::DVector;
use thiserror::Error;

use crate::domain::{SolverOptions, StrandWeights};
use crate::fit::system::{NormalEquationCache, SkinningContext};
use crate::math::{ActiveSetSolver, QpError, QpSolver};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("strand {strand} has no candidate guides")]
    EmptyCandidateSet { strand: usize },
    #[error("strand {strand}: singular normal equations ({source})")]
    SingularSystem { strand: usize, source: QpError },
    #[error("strand {strand}: QP solver failed ({source})")]
    SolverDiverged { strand: usize, source: QpError },
    #[error("missing input data: {0}")]
    MissingData(String),
}

impl SolveError {
    /// Fatal errors point at broken inputs and abort the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SolveError::EmptyCandidateSet { .. } | SolveError::MissingData(_))
    }

    fn from_qp(strand: usize, err: QpError) -> Self {
        match err {
            QpError::Empty => SolveError::EmptyCandidateSet { strand },
            QpError::Singular { .. } | QpError::NonFinite => SolveError::SingularSystem { strand, source: err },
            QpError::Diverged { .. } => SolveError::SolverDiverged { strand, source: err },
            QpError::Dimension { .. } => SolveError::MissingData(format!("strand {strand}: {err}")),
        }
    }
}

impl From<&SolverOptions> for ActiveSetSolver {
    fn from(options: &SolverOptions) -> Self {
        ActiveSetSolver {
            max_iterations: options.max_iterations,
            tolerance: options.tolerance,
            singular_tolerance: options.singular_tolerance,
        }
    }
}

/// Outcome of one strand solve.
#[derive(Debug, Clone, PartialEq)]
pub struct StrandFit {
    pub strand: usize,
    pub candidates: Vec<usize>,
    pub weights: Vec<f64>,
    /// Error of the uniform weights.
    pub error0: f64,
    /// Error of the solved weights.
    pub error: f64,
    pub iterations: usize,
    /// Whether the ridge retry was needed.
    pub regularized: bool,
}

impl StrandFit {
    pub fn into_weights(self) -> StrandWeights {
        StrandWeights {
            candidates: self.candidates,
            weights: self.weights,
            error0: self.error0,
            error: self.error,
        }
    }
}

/// Solves single strands against a fixed set of inputs.
#[derive(Debug, Clone)]
pub struct StrandSolver<'a, S: QpSolver = ActiveSetSolver> {
    ctx: SkinningContext<'a>,
    qp: S,
    options: SolverOptions,
}

impl<'a> StrandSolver<'a, ActiveSetSolver> {
    /// Solver backed by the active-set QP configured from `options`.
    pub fn active_set(ctx: SkinningContext<'a>, options: SolverOptions) -> Self {
        Self::new(ctx, ActiveSetSolver::from(&options), options)
    }
}

impl<'a, S: QpSolver> StrandSolver<'a, S> {
    pub fn new(ctx: SkinningContext<'a>, qp: S, options: SolverOptions) -> Self {
        Self { ctx, qp, options }
    }

    pub fn context(&self) -> &SkinningContext<'a> {
        &self.ctx
    }

    /// Solve the blend weights of `strand` over `candidates`.
    ///
    /// `cache` must belong to the calling worker; consecutive calls for the same
    /// strand reuse its normal equations.
    pub fn solve(
        &self,
        strand: usize,
        candidates: &[usize],
        cache: &mut NormalEquationCache,
    ) -> Result<StrandFit, SolveError> {
        if candidates.is_empty() {
            return Err(SolveError::EmptyCandidateSet { strand });
        }
        let n = candidates.len();
        let eq = cache.get_or_assemble(&self.ctx, strand, candidates)?;

        let problem = eq.to_qp();
        let start = problem.uniform_start();
        let error0 = eq.energy(&start);

        let (solution, regularized) = match self.qp.solve(&problem, &start) {
            Ok(solution) => (solution, false),
            Err(QpError::Singular { rcond }) => {
                let shift = self.options.ridge * (eq.aat.trace() / n as f64).max(1.0);
                debug!("strand {strand}: singular system (rcond {rcond:.3e}), retrying with ridge {shift:.3e}");
                let solution = self
                    .qp
                    .solve(&problem.regularized(shift), &start)
                    .map_err(|e| SolveError::from_qp(strand, e))?;
                (solution, true)
            }
            Err(e) => return Err(SolveError::from_qp(strand, e)),
        };

        let mut weights = clamp_to_simplex(solution.x);
        let mut error = eq.energy(&weights);
        if !(error <= error0) {
            debug!("strand {strand}: solved error {error:.6e} above baseline {error0:.6e}, keeping uniform weights");
            weights = start;
            error = error0;
        }

        debug!(
            "strand {strand}: n={n} iterations={} error {error0:.6e} -> {error:.6e}",
            solution.iterations
        );

        Ok(StrandFit {
            strand,
            candidates: candidates.to_vec(),
            weights: weights.iter().copied().collect(),
            error0,
            error,
            iterations: solution.iterations,
            regularized,
        })
    }
}

/// Zero out negative components, then rescale so the components sum to one.
fn clamp_to_simplex(x: DVector<f64>) -> DVector<f64> {
    let clamped = x.map(|v| if v > 0.0 { v } else { 0.0 });
    let sum = clamped.sum();
    if sum.is_finite() && sum > 0.0 {
        clamped / sum
    } else {
        let n = clamped.len();
        DVector::from_element(n, 1.0 / n.max(1) as f64)
    }
}
