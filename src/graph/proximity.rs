//! Proximity graph over particles / strands.
//!
//! Nodes start out as particles. Two particles are linked when they are within
//! `radius` of each other in a frame, and the edge weight counts in how many
//! frames that happened. The particle graph is then filtered (weak edges
//! dropped) and coarsened to strands by integer-dividing node ids by the number
//! of particles per strand.
//!
//! Neighbour search uses a uniform hash grid with cell size `radius`, so every
//! pair within range is found by scanning the 27 cells around a particle.

use std::collections::{BTreeMap, HashMap};

use log::info;
use nalgebra::Vector3;
use rayon::prelude::*;
use thiserror::Error;

use crate::domain::HairFrames;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("neighbour radius must be finite and > 0, got {0}")]
    InvalidRadius(f64),
    #[error("coarsening factor must be >= 1")]
    InvalidFactor,
    #[error("frame {frame} has {found} particles, expected {expected}")]
    ParticleCount {
        frame: usize,
        expected: usize,
        found: usize,
    },
}

/// Undirected weighted graph with edges keyed `(low, high)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProximityGraph {
    node_count: usize,
    edges: BTreeMap<(usize, usize), f64>,
}

impl ProximityGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: BTreeMap::new(),
        }
    }

    /// Build from explicit edges; repeated edges accumulate, self loops are ignored.
    pub fn from_edges(node_count: usize, edges: impl IntoIterator<Item = (usize, usize, f64)>) -> Self {
        let mut graph = Self::new(node_count);
        for (a, b, w) in edges {
            graph.add_weight(a, b, w);
        }
        graph
    }

    /// Count, for every particle pair, the frames in which it was within `radius`.
    pub fn from_frames(frames: &HairFrames, radius: f64) -> Result<Self, GraphError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(GraphError::InvalidRadius(radius));
        }
        let expected = frames.layout.particle_count();
        for frame in &frames.frames {
            if frame.positions.len() != expected {
                return Err(GraphError::ParticleCount {
                    frame: frame.id,
                    expected,
                    found: frame.positions.len(),
                });
            }
        }

        // Frames are independent; collect their pair lists in parallel.
        let per_frame: Vec<Vec<(usize, usize)>> = frames
            .frames
            .par_iter()
            .map(|frame| pairs_within_radius(&frame.positions, radius))
            .collect();

        let mut graph = Self::new(expected);
        for pairs in per_frame {
            for (a, b) in pairs {
                graph.add_weight(a, b, 1.0);
            }
        }
        Ok(graph)
    }

    fn add_weight(&mut self, a: usize, b: usize, w: f64) {
        if a == b {
            return;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        self.node_count = self.node_count.max(key.1 + 1);
        *self.edges.entry(key).or_insert(0.0) += w;
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn weight(&self, a: usize, b: usize) -> Option<f64> {
        let key = if a < b { (a, b) } else { (b, a) };
        self.edges.get(&key).copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.edges.iter().map(|(&(a, b), &w)| (a, b, w))
    }

    /// Drop edges lighter than `threshold`.
    pub fn filter(mut self, threshold: f64) -> Self {
        let before = self.edges.len();
        self.edges.retain(|_, w| *w >= threshold);
        info!("Filtered edges from {before} to {}", self.edges.len());
        self
    }

    /// Merge nodes `i` into `i / factor`, summing parallel edges and dropping self loops.
    pub fn coarsen(&self, factor: usize) -> Result<Self, GraphError> {
        if factor == 0 {
            return Err(GraphError::InvalidFactor);
        }
        let mut out = Self::new(self.node_count.div_ceil(factor));
        for (a, b, w) in self.edges() {
            out.add_weight(a / factor, b / factor, w);
        }
        info!(
            "Coarsened graph by {factor}: {} nodes, {} edges",
            out.node_count,
            out.edge_count()
        );
        Ok(out)
    }

    /// Neighbour lists, sorted by neighbour id.
    pub fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adj = vec![Vec::new(); self.node_count];
        for (a, b, w) in self.edges() {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        for list in &mut adj {
            list.sort_by_key(|&(n, _)| n);
        }
        adj
    }

    /// Rescale weights to integers in `1..=n_step + 1`, as METIS wants them.
    pub fn normalized_weights(&self, n_step: u32) -> BTreeMap<(usize, usize), u32> {
        let (lo, hi) = self
            .edges
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &w| (lo.min(w), hi.max(w)));
        let interval = hi - lo;

        self.edges
            .iter()
            .map(|(&key, &w)| {
                let level = if interval > 0.0 {
                    ((w - lo) / interval * f64::from(n_step)).floor() as u32
                } else {
                    0
                };
                (key, level + 1)
            })
            .collect()
    }
}

type Cell = (i64, i64, i64);

fn cell_of(p: &Vector3<f64>, inv: f64) -> Cell {
    (
        (p.x * inv).floor() as i64,
        (p.y * inv).floor() as i64,
        (p.z * inv).floor() as i64,
    )
}

/// All index pairs `(i, j)`, `i < j`, with `|p_i - p_j| <= radius`.
fn pairs_within_radius(points: &[Vector3<f64>], radius: f64) -> Vec<(usize, usize)> {
    let inv = 1.0 / radius;
    let r2 = radius * radius;

    let mut grid: HashMap<Cell, Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        grid.entry(cell_of(p, inv)).or_default().push(i);
    }

    let mut pairs = Vec::new();
    for (i, p) in points.iter().enumerate() {
        let (cx, cy, cz) = cell_of(p, inv);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let Some(bucket) = grid.get(&(cx + dx, cy + dy, cz + dz)) else {
                        continue;
                    };
                    for &j in bucket {
                        if j > i && (points[j] - p).norm_squared() <= r2 {
                            pairs.push((i, j));
                        }
                    }
                }
            }
        }
    }
    pairs.sort_unstable();
    pairs
}
