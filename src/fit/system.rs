//! Normal equations of the per-strand blend problem.
//!
//! For a strand `s` and candidate guides `g_1..g_n`, every frame `f` gives:
//!
//! - `tref_f`: the reference-pose particles of `s` moved by the frame's rigid motion
//! - `A_f` (n × 6·npar): row `k` is `Bg_{f,k}` applied to `tref_f`, flattened
//! - `treal_f` (6·npar): the observed particles of `s`, flattened
//!
//! and the reconstruction error `Σ_f ‖treal_f − A_fᵀ x‖²` expands to
//! `xᵀ·AAT·x − 2·Asᵀ·x + SST` with
//!
//! ```text
//! AAT = Σ A_f A_fᵀ    As = Σ A_f treal_f    SST = Σ treal_f · treal_f
//! ```
//!
//! The aggregates only depend on `(s, Ci)`, so they are assembled once per
//! strand and reused by every objective/gradient evaluation of that solve.

use nalgebra::{DMatrix, DVector};

use crate::domain::{GuideMotionTable, HairFrames, ParticleBatch, ReferencePose};
use crate::fit::solver::SolveError;
use crate::math::{SimplexQp, apply_point_transform, apply_rigid_transform};

/// Read-only inputs shared by every solve.
#[derive(Debug, Clone, Copy)]
pub struct SkinningContext<'a> {
    pub reference: &'a ReferencePose,
    pub frames: &'a HairFrames,
    pub guides: &'a GuideMotionTable,
}

impl<'a> SkinningContext<'a> {
    pub fn new(reference: &'a ReferencePose, frames: &'a HairFrames, guides: &'a GuideMotionTable) -> Self {
        Self {
            reference,
            frames,
            guides,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_guide(&self, strand: usize) -> bool {
        self.guides.is_guide(strand)
    }

    pub fn reference_strand(&self, strand: usize) -> Result<ParticleBatch, SolveError> {
        self.reference
            .strand(strand)
            .ok_or_else(|| SolveError::MissingData(format!("strand {strand} is not in the reference pose")))
    }

    /// `(A_f, treal_f)` of one frame.
    pub fn frame_system(
        &self,
        frame: usize,
        reference: &ParticleBatch,
        strand: usize,
        candidates: &[usize],
    ) -> Result<(DMatrix<f64>, DVector<f64>), SolveError> {
        let data = self
            .frames
            .frames
            .get(frame)
            .ok_or_else(|| SolveError::MissingData(format!("frame {frame} does not exist")))?;

        let treal = data
            .strand(&self.frames.layout, strand)
            .ok_or_else(|| {
                SolveError::MissingData(format!("strand {strand} is not in frame {}", data.id))
            })?
            .flatten();
        let tref = apply_rigid_transform(&data.rigid_motion, reference);

        let mut a = DMatrix::<f64>::zeros(candidates.len(), treal.len());
        for (k, &guide) in candidates.iter().enumerate() {
            let motion = self.guides.motion(frame, guide).ok_or_else(|| {
                SolveError::MissingData(format!("no motion for guide {guide} in frame {}", data.id))
            })?;
            let row = apply_point_transform(motion, &tref)
                .map_err(|e| SolveError::MissingData(format!("guide {guide}: {e}")))?
                .flatten();
            if row.len() != treal.len() {
                return Err(SolveError::MissingData(format!(
                    "guide {guide} yields {} components, strand {strand} has {}",
                    row.len(),
                    treal.len()
                )));
            }
            a.row_mut(k).tr_copy_from(&row);
        }
        Ok((a, treal))
    }
}

/// The cached quadratic-form aggregates of one strand.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    pub aat: DMatrix<f64>,
    pub a_s: DVector<f64>,
    pub sst: f64,
}

impl NormalEquations {
    pub fn zeros(n: usize) -> Self {
        Self {
            aat: DMatrix::zeros(n, n),
            a_s: DVector::zeros(n),
            sst: 0.0,
        }
    }

    pub fn dim(&self) -> usize {
        self.a_s.len()
    }

    /// Add one frame's contribution.
    pub fn accumulate(&mut self, a: &DMatrix<f64>, treal: &DVector<f64>) {
        self.aat += a * a.transpose();
        self.a_s += a * treal;
        self.sst += treal.dot(treal);
    }

    /// Sum the aggregates over every frame, from scratch.
    pub fn assemble(ctx: &SkinningContext<'_>, strand: usize, candidates: &[usize]) -> Result<Self, SolveError> {
        let reference = ctx.reference_strand(strand)?;
        let mut eq = Self::zeros(candidates.len());
        for frame in 0..ctx.frame_count() {
            let (a, treal) = ctx.frame_system(frame, &reference, strand, candidates)?;
            eq.accumulate(&a, &treal);
        }
        Ok(eq)
    }

    /// `E(x) = xᵀ·AAT·x − 2·Asᵀ·x + SST`.
    pub fn energy(&self, x: &DVector<f64>) -> f64 {
        (&self.aat * x).dot(x) - 2.0 * self.a_s.dot(x) + self.sst
    }

    /// `∇E(x) = 2·AAT·x − 2·As`.
    pub fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        (&self.aat * x - &self.a_s) * 2.0
    }

    pub fn to_qp(&self) -> SimplexQp {
        SimplexQp {
            quadratic: self.aat.clone(),
            linear: self.a_s.clone(),
            constant: self.sst,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSystem {
    strand: usize,
    candidates: Vec<usize>,
    equations: NormalEquations,
}

/// Memoized normal equations for the strand currently being solved.
///
/// One cache belongs to one worker; it is refreshed whenever the requested
/// strand (or its candidate set) differs from the cached one.
#[derive(Debug, Clone, Default)]
pub struct NormalEquationCache {
    entry: Option<CachedSystem>,
    assemblies: usize,
}

impl NormalEquationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the aggregates were (re)assembled.
    pub fn assemblies(&self) -> usize {
        self.assemblies
    }

    pub fn get_or_assemble(
        &mut self,
        ctx: &SkinningContext<'_>,
        strand: usize,
        candidates: &[usize],
    ) -> Result<&NormalEquations, SolveError> {
        let stale = self
            .entry
            .as_ref()
            .is_none_or(|e| e.strand != strand || e.candidates.as_slice() != candidates);

        if stale {
            self.entry = None;
            let equations = NormalEquations::assemble(ctx, strand, candidates)?;
            self.assemblies += 1;
            self.entry = Some(CachedSystem {
                strand,
                candidates: candidates.to_vec(),
                equations,
            });
        }

        self.entry
            .as_ref()
            .map(|e| &e.equations)
            .ok_or_else(|| SolveError::MissingData(format!("no normal equations for strand {strand}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::testing::{blend_dataset, BlendDataset};
    use approx::assert_relative_eq;

    /// Error summed directly from the per-frame residuals.
    fn residual_energy(ctx: &SkinningContext<'_>, strand: usize, candidates: &[usize], x: &DVector<f64>) -> f64 {
        let reference = ctx.reference_strand(strand).unwrap();
        (0..ctx.frame_count())
            .map(|f| {
                let (a, treal) = ctx.frame_system(f, &reference, strand, candidates).unwrap();
                (treal - a.transpose() * x).norm_squared()
            })
            .sum()
    }

    #[test]
    fn quadratic_form_matches_residual_sum() {
        let BlendDataset {
            reference,
            frames,
            guides,
            ..
        } = blend_dataset();
        let ctx = SkinningContext::new(&reference, &frames, &guides);
        let candidates = [0, 3];

        let eq = NormalEquations::assemble(&ctx, 1, &candidates).unwrap();
        for x in [[0.5, 0.5], [0.9, 0.1], [0.0, 1.0]] {
            let x = DVector::from_row_slice(&x);
            let direct = residual_energy(&ctx, 1, &candidates, &x);
            assert_relative_eq!(eq.energy(&x), direct, max_relative = 1e-9, epsilon = 1e-9);
        }
    }

    #[test]
    fn cached_aggregates_equal_fresh_assembly_across_strands() {
        let BlendDataset {
            reference,
            frames,
            guides,
            ..
        } = blend_dataset();
        let ctx = SkinningContext::new(&reference, &frames, &guides);
        let candidates = [0, 3];
        let mut cache = NormalEquationCache::new();

        for strand in [1, 2, 4, 1, 1, 2] {
            let cached = cache.get_or_assemble(&ctx, strand, &candidates).unwrap().clone();
            let fresh = NormalEquations::assemble(&ctx, strand, &candidates).unwrap();
            assert_eq!(cached, fresh, "strand {strand}");
        }
        // 1, 2, 4, 1, (1 cached), 2
        assert_eq!(cache.assemblies(), 5);
    }

    #[test]
    fn changed_candidates_invalidate_the_cache() {
        let BlendDataset {
            reference,
            frames,
            guides,
            ..
        } = blend_dataset();
        let ctx = SkinningContext::new(&reference, &frames, &guides);
        let mut cache = NormalEquationCache::new();

        let two = cache.get_or_assemble(&ctx, 1, &[0, 3]).unwrap().dim();
        let one = cache.get_or_assemble(&ctx, 1, &[3]).unwrap().dim();
        assert_eq!((two, one), (2, 1));
        assert_eq!(cache.assemblies(), 2);
    }

    #[test]
    fn gradient_is_derivative_of_energy() {
        let BlendDataset {
            reference,
            frames,
            guides,
            ..
        } = blend_dataset();
        let ctx = SkinningContext::new(&reference, &frames, &guides);
        let eq = NormalEquations::assemble(&ctx, 2, &[0, 3]).unwrap();

        let x = DVector::from_row_slice(&[0.4, 0.6]);
        let g = eq.gradient(&x);
        let h = 1e-6;
        for i in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = (eq.energy(&xp) - eq.energy(&xm)) / (2.0 * h);
            assert_relative_eq!(g[i], fd, max_relative = 1e-5, epsilon = 1e-5);
        }
    }

    #[test]
    fn missing_strand_is_reported() {
        let BlendDataset {
            reference,
            frames,
            guides,
            ..
        } = blend_dataset();
        let ctx = SkinningContext::new(&reference, &frames, &guides);
        let err = NormalEquations::assemble(&ctx, 99, &[0]).unwrap_err();
        assert!(matches!(err, SolveError::MissingData(_)), "{err:?}");
    }
}
