//! Rigid and per-particle transforms of particle batches.
//!
//! Transforms are homogeneous 4×4 matrices in column-vector convention:
//! positions are moved as points (`M·[p, 1]`), directions as vectors
//! (`M·[d, 0]`, i.e. only the linear 3×3 block applies).

use nalgebra::{Matrix4, Vector3};
use thiserror::Error;

use crate::domain::ParticleBatch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("expected 1 or {expected} particle transforms, got {found}")]
    MotionCountMismatch { expected: usize, found: usize },
}

#[inline]
fn transform_position(m: &Matrix4<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    let h = m * p.push(1.0);
    Vector3::new(h.x, h.y, h.z)
}

#[inline]
fn transform_direction(m: &Matrix4<f64>, d: &Vector3<f64>) -> Vector3<f64> {
    m.fixed_view::<3, 3>(0, 0) * d
}

/// Apply one rigid motion to every particle of `reference`.
pub fn apply_rigid_transform(motion: &Matrix4<f64>, reference: &ParticleBatch) -> ParticleBatch {
    let positions = reference
        .positions
        .iter()
        .map(|p| transform_position(motion, p))
        .collect();
    let directions = reference
        .directions
        .iter()
        .map(|d| transform_direction(motion, d))
        .collect();
    ParticleBatch::new(positions, directions)
}

/// Apply the i-th transform of `motions` to the i-th particle of `reference`.
///
/// A single transform is broadcast to every particle.
pub fn apply_point_transform(
    motions: &[Matrix4<f64>],
    reference: &ParticleBatch,
) -> Result<ParticleBatch, GeometryError> {
    if motions.len() == 1 {
        return Ok(apply_rigid_transform(&motions[0], reference));
    }
    if motions.len() != reference.len() {
        return Err(GeometryError::MotionCountMismatch {
            expected: reference.len(),
            found: motions.len(),
        });
    }

    let positions = motions
        .iter()
        .zip(&reference.positions)
        .map(|(m, p)| transform_position(m, p))
        .collect();
    let directions = motions
        .iter()
        .zip(&reference.directions)
        .map(|(m, d)| transform_direction(m, d))
        .collect();
    Ok(ParticleBatch::new(positions, directions))
}
