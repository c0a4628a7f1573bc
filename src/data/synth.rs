//! Synthetic hair datasets with known blend weights.
//!
//! Strands hang from a square grid of roots on a flat scalp. Every
//! `guide_every`-th strand is a guide with its own swaying motion; every other
//! strand moves as an inverse-distance blend of its nearest guides, plus
//! optional Gaussian noise. The head moves rigidly on top of that.
//!
//! Frame 0 is the rest pose (identity rigid motion, identity guide motions), so
//! it doubles as the reference frame.

use nalgebra::{Matrix4, Rotation3, Translation3, Vector3};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    Frame, GuideMotionTable, HairFrames, ParticleBatch, ReferencePose, StrandLayout, StrandWeights,
    WeightEntry, WeightTable,
};
use crate::error::AppError;
use crate::math::{apply_point_transform, apply_rigid_transform};

/// Guides blended into each ordinary strand.
const GUIDES_PER_STRAND: usize = 3;

/// Time step between frames (radians of the sway phase).
const FRAME_DT: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub strand_count: usize,
    pub particles_per_strand: usize,
    pub guide_every: usize,
    pub frame_count: usize,
    pub seed: u64,
    /// Standard deviation of the noise added to ordinary strands.
    pub noise: f64,
    /// Distance between neighbouring roots.
    pub spacing: f64,
    /// Distance between consecutive particles of a strand.
    pub segment_length: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            strand_count: 64,
            particles_per_strand: crate::domain::DEFAULT_PARTICLES_PER_STRAND,
            guide_every: 4,
            frame_count: 12,
            seed: 42,
            noise: 0.0,
            spacing: 0.5,
            segment_length: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthDataset {
    pub reference: ReferencePose,
    pub frames: HairFrames,
    pub guides: GuideMotionTable,
    /// Ground-truth `(guide, weight)` blend per strand (empty for guides).
    pub truth: Vec<Vec<(usize, f64)>>,
}

impl SynthDataset {
    /// The ground truth as a weight table (zero errors).
    pub fn truth_table(&self) -> WeightTable {
        let layout = self.reference.layout;
        let mut table = WeightTable::new(layout.particles_per_strand, layout.end_strand());
        for (strand, blend) in layout.strands().zip(&self.truth) {
            table.entries[strand] = if self.guides.is_guide(strand) {
                WeightEntry::Guide
            } else {
                WeightEntry::Solved(StrandWeights {
                    candidates: blend.iter().map(|&(g, _)| g).collect(),
                    weights: blend.iter().map(|&(_, w)| w).collect(),
                    error0: 0.0,
                    error: 0.0,
                })
            };
        }
        table
    }
}

pub fn generate(config: &SynthConfig) -> Result<SynthDataset, AppError> {
    if config.strand_count == 0 || config.particles_per_strand == 0 {
        return Err(AppError::new(2, "Strand and particle counts must be > 0."));
    }
    if config.guide_every == 0 {
        return Err(AppError::new(2, "Guide spacing must be >= 1."));
    }
    if config.frame_count == 0 {
        return Err(AppError::new(2, "Frame count must be > 0."));
    }
    if !(config.noise.is_finite() && config.noise >= 0.0) {
        return Err(AppError::new(2, "Noise must be finite and >= 0."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let unit = Normal::new(0.0, 1.0).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let npar = config.particles_per_strand;
    let layout = StrandLayout::new(npar, 0, config.strand_count);
    let columns = (config.strand_count as f64).sqrt().ceil() as usize;

    let roots: Vec<Vector3<f64>> = (0..config.strand_count)
        .map(|s| {
            let (row, col) = (s / columns, s % columns);
            Vector3::new(col as f64 * config.spacing, 0.0, row as f64 * config.spacing)
        })
        .collect();

    // Rest pose: strands hang down with a small random tilt.
    let mut positions = Vec::with_capacity(layout.particle_count());
    let mut directions = Vec::with_capacity(layout.particle_count());
    for root in &roots {
        let tilt = Vector3::new(0.1 * unit.sample(&mut rng), -1.0, 0.1 * unit.sample(&mut rng)).normalize();
        for p in 0..npar {
            positions.push(root + tilt * (p as f64 * config.segment_length));
            directions.push(tilt);
        }
    }
    let rest = Frame {
        id: 0,
        rigid_motion: Matrix4::identity(),
        positions,
        directions,
    };
    let reference = ReferencePose {
        layout,
        frame: rest,
    };

    let guide_ids: Vec<usize> = (0..config.strand_count)
        .filter(|s| s % config.guide_every == 0)
        .collect();

    let rigid: Vec<Matrix4<f64>> = (0..config.frame_count)
        .map(|f| head_motion(f as f64 * FRAME_DT))
        .collect();

    // Per-guide sway parameters.
    let sway: Vec<(f64, f64)> = guide_ids
        .iter()
        .map(|_| {
            let phase = rng.gen_range(0.0..std::f64::consts::TAU);
            let amplitude = 0.3 + 0.1 * unit.sample(&mut rng).abs();
            (phase, amplitude)
        })
        .collect();

    let length = config.segment_length * npar as f64;
    let mut motions = Vec::with_capacity(config.frame_count);
    for (f, head) in rigid.iter().enumerate() {
        let t = f as f64 * FRAME_DT;
        let mut frame_motions = Vec::with_capacity(guide_ids.len() * npar);
        for (&g, &(phase, amplitude)) in guide_ids.iter().zip(&sway) {
            let pivot = (head * roots[g].push(1.0)).xyz();
            for p in 0..npar {
                let u = p as f64 / npar as f64;
                frame_motions.push(sway_motion(pivot, t, phase, amplitude * length, u));
            }
        }
        motions.push(frame_motions);
    }
    let guides = GuideMotionTable::new(npar, guide_ids.clone(), motions)
        .ok_or_else(|| AppError::new(4, "Inconsistent synthetic guide table."))?;

    let truth: Vec<Vec<(usize, f64)>> = roots
        .iter()
        .enumerate()
        .map(|(s, root)| {
            if guides.is_guide(s) {
                Vec::new()
            } else {
                nearest_guide_blend(root, &roots, &guide_ids)
            }
        })
        .collect();

    let mut frames = compose_frames(&reference, &rigid, &guides, &truth)?;
    if config.noise > 0.0 {
        for frame in frames.frames.iter_mut().skip(1) {
            for s in layout.strands().filter(|&s| !guides.is_guide(s)) {
                for i in layout.particle_range(s).unwrap_or_default() {
                    frame.positions[i] += Vector3::from_fn(|_, _| config.noise * unit.sample(&mut rng));
                }
            }
        }
    }

    Ok(SynthDataset {
        reference,
        frames,
        guides,
        truth,
    })
}

/// Animate every strand of `reference`: guides follow their own motion, the
/// others follow the `(guide, weight)` blend listed for them in `blends`.
pub fn compose_frames(
    reference: &ReferencePose,
    rigid: &[Matrix4<f64>],
    guides: &GuideMotionTable,
    blends: &[Vec<(usize, f64)>],
) -> Result<HairFrames, AppError> {
    let layout = reference.layout;
    if blends.len() != layout.strand_count {
        return Err(AppError::new(
            2,
            format!("Expected {} strand blends, got {}.", layout.strand_count, blends.len()),
        ));
    }

    let mut frames = Vec::with_capacity(rigid.len());
    for (f, head) in rigid.iter().enumerate() {
        let mut positions = Vec::with_capacity(layout.particle_count());
        let mut directions = Vec::with_capacity(layout.particle_count());

        for (local, strand) in layout.strands().enumerate() {
            let rest = reference
                .strand(strand)
                .ok_or_else(|| AppError::new(2, format!("Strand {strand} missing from the reference pose.")))?;
            let tref = apply_rigid_transform(head, &rest);

            let moved = if guides.is_guide(strand) {
                guide_state(guides, f, strand, &tref)?
            } else {
                let mut acc = ParticleBatch::new(
                    vec![Vector3::zeros(); tref.len()],
                    vec![Vector3::zeros(); tref.len()],
                );
                for &(g, w) in &blends[local] {
                    let state = guide_state(guides, f, g, &tref)?;
                    for i in 0..acc.len() {
                        acc.positions[i] += state.positions[i] * w;
                        acc.directions[i] += state.directions[i] * w;
                    }
                }
                acc
            };
            positions.extend(moved.positions);
            directions.extend(moved.directions);
        }

        frames.push(Frame {
            id: f,
            rigid_motion: *head,
            positions,
            directions,
        });
    }

    Ok(HairFrames { layout, frames })
}

fn guide_state(
    guides: &GuideMotionTable,
    frame: usize,
    guide: usize,
    tref: &ParticleBatch,
) -> Result<ParticleBatch, AppError> {
    let motion = guides
        .motion(frame, guide)
        .ok_or_else(|| AppError::new(2, format!("No motion for guide {guide} in frame {frame}.")))?;
    apply_point_transform(motion, tref).map_err(|e| AppError::new(2, format!("Guide {guide}: {e}")))
}

/// Head motion: a slow nod around y plus a small drift.
fn head_motion(t: f64) -> Matrix4<f64> {
    let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.15 * t.sin());
    let translation = Translation3::new(0.1 * t, 0.05 * t.sin(), 0.0);
    translation.to_homogeneous() * rotation.to_homogeneous()
}

/// Sway of one guide particle at strand fraction `u`: a bend around the root
/// plus a lateral offset growing towards the tip. Identity at `t = 0`.
fn sway_motion(pivot: Vector3<f64>, t: f64, phase: f64, amplitude: f64, u: f64) -> Matrix4<f64> {
    let swing = (t + phase).sin() - phase.sin();
    let bend = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.4 * swing * u);
    let offset = Vector3::new(swing, 0.0, 0.5 * ((t + phase).cos() - phase.cos())) * (amplitude * u * u);

    Translation3::from(pivot + offset).to_homogeneous()
        * bend.to_homogeneous()
        * Translation3::from(-pivot).to_homogeneous()
}

/// Inverse-distance weights over the nearest guides.
fn nearest_guide_blend(root: &Vector3<f64>, roots: &[Vector3<f64>], guide_ids: &[usize]) -> Vec<(usize, f64)> {
    let mut by_distance: Vec<(usize, f64)> = guide_ids
        .iter()
        .map(|&g| (g, (roots[g] - root).norm()))
        .collect();
    by_distance.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    by_distance.truncate(GUIDES_PER_STRAND);

    let inv: Vec<f64> = by_distance.iter().map(|&(_, d)| 1.0 / (d + 1e-6)).collect();
    let total: f64 = inv.iter().sum();
    let mut blend: Vec<(usize, f64)> = by_distance
        .iter()
        .zip(&inv)
        .map(|(&(g, _), &w)| (g, w / total))
        .collect();
    blend.sort_by_key(|&(g, _)| g);
    blend
}
