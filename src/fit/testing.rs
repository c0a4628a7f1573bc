//! Small hand-built datasets shared by the estimation tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DVector, Matrix4, Rotation3, Translation3, Unit, Vector3};

use crate::data::synth::compose_frames;
use crate::domain::{Frame, GuideMotionTable, HairFrames, ReferencePose, StrandLayout};
use crate::math::{ActiveSetSolver, QpError, QpSolution, QpSolver, SimplexQp};

pub(crate) struct BlendDataset {
    pub reference: ReferencePose,
    pub frames: HairFrames,
    pub guides: GuideMotionTable,
    pub truth: Vec<Vec<(usize, f64)>>,
}

fn rest_pose(npar: usize, strands: usize, scale: f64) -> ReferencePose {
    let layout = StrandLayout::new(npar, 0, strands);
    let mut positions = Vec::new();
    let mut directions = Vec::new();
    for s in 0..strands {
        let dir = Vector3::new(0.1 * s as f64, -1.0, 0.05).normalize();
        for p in 0..npar {
            positions.push((Vector3::new(s as f64, 0.0, 0.2 * s as f64) + dir * (0.3 * p as f64)) * scale);
            directions.push(dir);
        }
    }
    ReferencePose {
        layout,
        frame: Frame {
            id: 0,
            rigid_motion: Matrix4::identity(),
            positions,
            directions,
        },
    }
}

fn rigid(frame: usize, scale: f64) -> Matrix4<f64> {
    let t = frame as f64;
    Translation3::new(0.1 * t * scale, 0.02 * t * scale, 0.0).to_homogeneous()
        * Rotation3::from_axis_angle(&Vector3::y_axis(), 0.05 * t).to_homogeneous()
}

/// Distinct per-particle motion for guide parameter `k`.
fn guide_motion(k: f64, frame: usize, particle: usize, scale: f64) -> Matrix4<f64> {
    let t = frame as f64;
    let p = particle as f64 + 1.0;
    let axis = Unit::new_normalize(Vector3::new(1.0, k, 0.5 * k * k));
    Translation3::new(0.05 * t * k * scale, 0.02 * t * p * scale, -0.03 * t * k * k * scale).to_homogeneous()
        * Rotation3::from_axis_angle(&axis, 0.1 * t * p * k).to_homogeneous()
}

fn motions(guide_params: &[f64], npar: usize, frames: usize, scale: f64) -> Vec<Vec<Matrix4<f64>>> {
    (0..frames)
        .map(|f| {
            guide_params
                .iter()
                .flat_map(|&k| (0..npar).map(move |p| guide_motion(k, f, p, scale)))
                .collect()
        })
        .collect()
}

/// 5 strands of 4 particles, guides 0 and 3, 4 frames.
///
/// Strand 1 = 0.7·g0 + 0.3·g3, strand 2 = 0.4·g0 + 0.6·g3,
/// strand 4 = 0.2·g0 + 0.8·g3, all without noise.
pub(crate) fn blend_dataset() -> BlendDataset {
    scaled_blend_dataset(1.0)
}

/// [`blend_dataset`] with every length multiplied by `scale`.
pub(crate) fn scaled_blend_dataset(scale: f64) -> BlendDataset {
    let (npar, frame_count) = (4, 4);
    let reference = rest_pose(npar, 5, scale);
    let guides =
        GuideMotionTable::new(npar, vec![0, 3], motions(&[1.0, 2.0], npar, frame_count, scale)).unwrap();
    let truth = vec![
        vec![],
        vec![(0, 0.7), (3, 0.3)],
        vec![(0, 0.4), (3, 0.6)],
        vec![],
        vec![(0, 0.2), (3, 0.8)],
    ];
    let rigid: Vec<_> = (0..frame_count).map(|f| rigid(f, scale)).collect();
    let frames = compose_frames(&reference, &rigid, &guides, &truth).unwrap();
    BlendDataset {
        reference,
        frames,
        guides,
        truth,
    }
}

/// 2 strands of 3 particles over 3 frames; strand 1 moves exactly like guide 0.
pub(crate) fn single_guide_dataset() -> BlendDataset {
    let (npar, frame_count) = (3, 3);
    let reference = rest_pose(npar, 2, 1.0);
    let guides = GuideMotionTable::new(npar, vec![0], motions(&[1.5], npar, frame_count, 1.0)).unwrap();
    let truth = vec![vec![], vec![(0, 1.0)]];
    let rigid: Vec<_> = (0..frame_count).map(|f| rigid(f, 1.0)).collect();
    let frames = compose_frames(&reference, &rigid, &guides, &truth).unwrap();
    BlendDataset {
        reference,
        frames,
        guides,
        truth,
    }
}

/// Reports problems as singular and counts how often it did so.
///
/// With `target` set only problems with that linear term fail (a ridge shift
/// leaves the linear term alone, so retries fail too); everything else goes
/// to the active-set solver.
pub(crate) struct SingularQp {
    target: Option<DVector<f64>>,
    rejected: AtomicUsize,
}

impl SingularQp {
    pub fn always() -> Self {
        Self {
            target: None,
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn on(linear: DVector<f64>) -> Self {
        Self {
            target: Some(linear),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl QpSolver for SingularQp {
    fn solve(&self, problem: &SimplexQp, x0: &DVector<f64>) -> Result<QpSolution, QpError> {
        if self.target.as_ref().is_none_or(|l| *l == problem.linear) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(QpError::Singular { rcond: 0.0 });
        }
        ActiveSetSolver::default().solve(problem, x0)
    }
}
