//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - shared read-only between estimation workers
//! - exported to JSON/CSV
//! - reloaded later for inspection

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

use nalgebra::{DVector, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Particles per strand used by the simulation caches we consume.
pub const DEFAULT_PARTICLES_PER_STRAND: usize = 25;

/// How strands are packed into the particle arrays of a frame.
///
/// A frame may hold only a window of the full hair: strand `s` lives at local
/// slot `s - first_strand`, and its particles are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandLayout {
    pub particles_per_strand: usize,
    /// Global index of the first strand stored (the offset base).
    pub first_strand: usize,
    pub strand_count: usize,
}

impl StrandLayout {
    pub fn new(particles_per_strand: usize, first_strand: usize, strand_count: usize) -> Self {
        Self {
            particles_per_strand,
            first_strand,
            strand_count,
        }
    }

    /// One past the last global strand index covered by this layout.
    pub fn end_strand(&self) -> usize {
        self.first_strand + self.strand_count
    }

    pub fn particle_count(&self) -> usize {
        self.strand_count * self.particles_per_strand
    }

    pub fn contains(&self, strand: usize) -> bool {
        strand >= self.first_strand && strand < self.end_strand()
    }

    pub fn strands(&self) -> Range<usize> {
        self.first_strand..self.end_strand()
    }

    /// Local particle range of a global strand index.
    pub fn particle_range(&self, strand: usize) -> Option<Range<usize>> {
        if !self.contains(strand) {
            return None;
        }
        let local = strand - self.first_strand;
        let npar = self.particles_per_strand;
        Some(local * npar..(local + 1) * npar)
    }
}

/// Positions and directions of a run of particles (usually one strand).
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleBatch {
    pub positions: Vec<Vector3<f64>>,
    pub directions: Vec<Vector3<f64>>,
}

impl ParticleBatch {
    pub fn new(positions: Vec<Vector3<f64>>, directions: Vec<Vector3<f64>>) -> Self {
        debug_assert_eq!(positions.len(), directions.len());
        Self {
            positions,
            directions,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Flatten to `6 * len` components: every position (xyz), then every direction.
    pub fn flatten(&self) -> DVector<f64> {
        let n = self.len();
        let mut out = DVector::zeros(6 * n);
        for (i, p) in self.positions.iter().enumerate() {
            out[3 * i] = p.x;
            out[3 * i + 1] = p.y;
            out[3 * i + 2] = p.z;
        }
        let base = 3 * n;
        for (i, d) in self.directions.iter().enumerate() {
            out[base + 3 * i] = d.x;
            out[base + 3 * i + 1] = d.y;
            out[base + 3 * i + 2] = d.z;
        }
        out
    }
}

/// One animation frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame number as stored in the cache.
    pub id: usize,
    /// Rigid (head) motion relative to the reference frame.
    pub rigid_motion: Matrix4<f64>,
    pub positions: Vec<Vector3<f64>>,
    pub directions: Vec<Vector3<f64>>,
}

impl Frame {
    /// Particles of a global strand index, or `None` when the layout does not cover it.
    pub fn strand(&self, layout: &StrandLayout, strand: usize) -> Option<ParticleBatch> {
        let range = layout.particle_range(strand)?;
        if range.end > self.positions.len() || range.end > self.directions.len() {
            return None;
        }
        Some(ParticleBatch::new(
            self.positions[range.clone()].to_vec(),
            self.directions[range].to_vec(),
        ))
    }
}

/// The animation: an ordered list of frames sharing one layout.
#[derive(Debug, Clone)]
pub struct HairFrames {
    pub layout: StrandLayout,
    pub frames: Vec<Frame>,
}

impl HairFrames {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// The rest pose every frame's rigid motion is expressed against.
#[derive(Debug, Clone)]
pub struct ReferencePose {
    pub layout: StrandLayout,
    pub frame: Frame,
}

impl ReferencePose {
    pub fn strand(&self, strand: usize) -> Option<ParticleBatch> {
        self.frame.strand(&self.layout, strand)
    }
}

/// Per-frame, per-guide particle motions (`Bg`).
///
/// Motions are stored flat: frame `f`, guide slot `k`, particle `p` lives at
/// `motions[f][k * particles_per_strand + p]`.
#[derive(Debug, Clone)]
pub struct GuideMotionTable {
    pub particles_per_strand: usize,
    /// Guide strand ids in slot order.
    guides: Vec<usize>,
    slots: HashMap<usize, usize>,
    motions: Vec<Vec<Matrix4<f64>>>,
}

impl GuideMotionTable {
    /// Build a table; returns `None` if a frame has the wrong number of motions
    /// or a guide id is repeated.
    pub fn new(
        particles_per_strand: usize,
        guides: Vec<usize>,
        motions: Vec<Vec<Matrix4<f64>>>,
    ) -> Option<Self> {
        let per_frame = guides.len() * particles_per_strand;
        if motions.iter().any(|m| m.len() != per_frame) {
            return None;
        }
        let mut slots = HashMap::with_capacity(guides.len());
        for (slot, &g) in guides.iter().enumerate() {
            if slots.insert(g, slot).is_some() {
                return None;
            }
        }
        Some(Self {
            particles_per_strand,
            guides,
            slots,
            motions,
        })
    }

    pub fn guides(&self) -> &[usize] {
        &self.guides
    }

    pub fn frame_count(&self) -> usize {
        self.motions.len()
    }

    pub fn is_guide(&self, strand: usize) -> bool {
        self.slots.contains_key(&strand)
    }

    /// Per-particle motions of guide `strand` in frame `frame`.
    pub fn motion(&self, frame: usize, strand: usize) -> Option<&[Matrix4<f64>]> {
        let slot = *self.slots.get(&strand)?;
        let npar = self.particles_per_strand;
        self.motions
            .get(frame)
            .map(|m| &m[slot * npar..(slot + 1) * npar])
    }

    /// All motions of one frame, in slot order.
    pub fn frame_motions(&self, frame: usize) -> Option<&[Matrix4<f64>]> {
        self.motions.get(frame).map(Vec::as_slice)
    }
}

/// Half-open, contiguous range of global strand indices processed as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandRange {
    pub start: usize,
    pub end: usize,
}

impl StrandRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn iter(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Split into consecutive sub-ranges of at most `chunk` strands.
    pub fn chunks(&self, chunk: usize) -> Vec<StrandRange> {
        let chunk = chunk.max(1);
        let mut out = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = (start + chunk).min(self.end);
            out.push(StrandRange::new(start, end));
            start = end;
        }
        out
    }
}

impl std::fmt::Display for StrandRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Numerical knobs of the per-strand QP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Active-set iteration budget per strand.
    pub max_iterations: usize,
    /// Step / multiplier tolerance of the active-set method.
    pub tolerance: f64,
    /// Face systems with relative reciprocal condition below this are treated as singular.
    pub singular_tolerance: f64,
    /// Relative diagonal perturbation used for the single regularized retry.
    pub ridge: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            singular_tolerance: 1e-13,
            ridge: 1e-8,
        }
    }
}

/// Where the strand partition comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionSource {
    /// Deterministic label propagation on the coarsened strand graph.
    LabelPropagation { max_iterations: usize },
    /// A METIS partition file (one group id per coarse node).
    File(PathBuf),
}

/// Proximity graph and grouping settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Neighbour radius in cache units.
    pub radius: f64,
    /// Minimum number of frames a particle pair must be neighbours in.
    pub edge_threshold: f64,
    /// Extra coarsening of the strand graph before partitioning.
    pub group_factor: usize,
    pub partition: PartitionSource,
}

/// A full estimation run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct EstimateConfig {
    pub cache_path: PathBuf,
    pub guides_path: PathBuf,
    /// Optional separate cache holding the reference pose.
    pub reference_path: Option<PathBuf>,
    pub reference_frame: usize,
    pub particles_per_strand: usize,
    /// Global index of the first strand stored in the cache.
    pub first_strand: usize,

    pub graph: GraphConfig,
    pub solver: SolverOptions,

    /// Strands to estimate; `None` means every strand in the cache.
    pub task: Option<StrandRange>,
    /// Worker threads (0 = rayon default).
    pub workers: usize,
    /// Strands per parallel work item.
    pub chunk_size: usize,

    pub output: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
    pub top_n: usize,
    pub progress: bool,
}

/// Solved blend weights of one ordinary strand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrandWeights {
    /// Candidate guide strands, in the order the weights refer to.
    pub candidates: Vec<usize>,
    pub weights: Vec<f64>,
    /// Reconstruction error of uniform weights.
    pub error0: f64,
    /// Reconstruction error of the solved weights.
    pub error: f64,
}

/// One slot of the weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WeightEntry {
    /// Not processed (outside the task, or the run was cancelled first).
    Pending,
    /// Guide strands carry their own motion and have no weights.
    Guide,
    Solved(StrandWeights),
    /// Per-strand numerical failure; the batch continued.
    Unsolved { reason: String },
}

impl WeightEntry {
    pub fn weights(&self) -> Option<&StrandWeights> {
        match self {
            WeightEntry::Solved(w) => Some(w),
            _ => None,
        }
    }
}

/// The estimation output: one entry per global strand index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub particles_per_strand: usize,
    pub entries: Vec<WeightEntry>,
}

impl WeightTable {
    pub fn new(particles_per_strand: usize, strand_count: usize) -> Self {
        Self {
            particles_per_strand,
            entries: vec![WeightEntry::Pending; strand_count],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, strand: usize) -> Option<&WeightEntry> {
        self.entries.get(strand)
    }

    /// Mutable slots of a task; `None` when the task runs past the table.
    pub fn slots_mut(&mut self, task: StrandRange) -> Option<&mut [WeightEntry]> {
        self.entries.get_mut(task.start..task.end)
    }

    pub fn solved(&self) -> impl Iterator<Item = (usize, &StrandWeights)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(s, e)| e.weights().map(|w| (s, w)))
    }
}

/// A saved weight table (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightFile {
    pub tool: String,
    /// RFC 3339 timestamp of the run.
    pub generated: String,
    pub task: StrandRange,
    pub error0: f64,
    pub error: f64,
    pub succeeded: usize,
    pub failed: usize,
    pub table: WeightTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_maps_global_strand_to_local_particles() {
        let layout = StrandLayout::new(4, 10, 3);
        assert_eq!(layout.particle_range(10), Some(0..4));
        assert_eq!(layout.particle_range(12), Some(8..12));
        assert_eq!(layout.particle_range(9), None);
        assert_eq!(layout.particle_range(13), None);
        assert_eq!(layout.particle_count(), 12);
    }

    #[test]
    fn flatten_puts_positions_before_directions() {
        let batch = ParticleBatch::new(
            vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)],
            vec![Vector3::new(7.0, 8.0, 9.0), Vector3::new(10.0, 11.0, 12.0)],
        );
        let flat = batch.flatten();
        let expected: Vec<f64> = (1..=12).map(|v| v as f64).collect();
        assert_eq!(flat.as_slice(), expected.as_slice());
    }

    #[test]
    fn strand_range_chunks_cover_range_once() {
        let chunks = StrandRange::new(3, 11).chunks(3);
        assert_eq!(
            chunks,
            vec![
                StrandRange::new(3, 6),
                StrandRange::new(6, 9),
                StrandRange::new(9, 11)
            ]
        );
    }

    #[test]
    fn weight_entry_serializes_with_kind_tag() {
        let entry = WeightEntry::Solved(StrandWeights {
            candidates: vec![0, 4],
            weights: vec![0.25, 0.75],
            error0: 2.0,
            error: 1.0,
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"solved\""), "{json}");
        let back: WeightEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);

        let guide = serde_json::to_string(&WeightEntry::Guide).unwrap();
        assert_eq!(guide, "{\"kind\":\"guide\"}");
    }
}
