//! Reporting utilities: table statistics, error rankings, truth comparison.

use std::collections::BTreeMap;

use crate::domain::{StrandWeights, WeightEntry, WeightTable};

pub mod format;

pub use format::*;

/// Counts and totals of a weight table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TableStats {
    pub strands: usize,
    pub guides: usize,
    pub solved: usize,
    pub unsolved: usize,
    pub pending: usize,
    pub error0: f64,
    pub error: f64,
}

pub fn table_stats(table: &WeightTable) -> TableStats {
    let mut stats = TableStats {
        strands: table.len(),
        ..TableStats::default()
    };
    for entry in &table.entries {
        match entry {
            WeightEntry::Pending => stats.pending += 1,
            WeightEntry::Guide => stats.guides += 1,
            WeightEntry::Unsolved { .. } => stats.unsolved += 1,
            WeightEntry::Solved(w) => {
                stats.solved += 1;
                stats.error0 += w.error0;
                stats.error += w.error;
            }
        }
    }
    stats
}

/// One row of the worst-strands table.
#[derive(Debug, Clone, PartialEq)]
pub struct StrandError {
    pub strand: usize,
    pub candidates: usize,
    pub error0: f64,
    pub error: f64,
}

impl StrandError {
    /// Fraction of the uniform-weight error removed by the solve.
    pub fn reduction(&self) -> f64 {
        if self.error0 > 0.0 {
            1.0 - self.error / self.error0
        } else {
            0.0
        }
    }
}

/// The `top_n` solved strands with the largest optimized error.
pub fn rank_strands_by_error(table: &WeightTable, top_n: usize) -> Vec<StrandError> {
    let mut rows: Vec<StrandError> = table
        .solved()
        .map(|(strand, w)| StrandError {
            strand,
            candidates: w.candidates.len(),
            error0: w.error0,
            error: w.error,
        })
        .collect();
    rows.sort_by(|a, b| b.error.total_cmp(&a.error).then(a.strand.cmp(&b.strand)));
    rows.truncate(top_n);
    rows
}

/// Agreement between estimated weights and known blend weights.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TruthComparison {
    /// Strands solved in both tables.
    pub compared: usize,
    /// Mean over strands of the largest per-guide weight difference.
    pub mean_max_abs: f64,
    pub worst_max_abs: f64,
    pub worst_strand: Option<usize>,
}

fn guide_weights(w: &StrandWeights) -> BTreeMap<usize, f64> {
    let mut out = BTreeMap::new();
    for (&g, &v) in w.candidates.iter().zip(&w.weights) {
        *out.entry(g).or_insert(0.0) += v;
    }
    out
}

/// Compare per guide; a guide missing from one side counts as weight 0.
pub fn compare_to_truth(estimate: &WeightTable, truth: &WeightTable) -> TruthComparison {
    let mut cmp = TruthComparison::default();
    let mut total = 0.0;

    for (strand, est) in estimate.solved() {
        let Some(expected) = truth.get(strand).and_then(WeightEntry::weights) else {
            continue;
        };
        let a = guide_weights(est);
        let b = guide_weights(expected);
        let diff = a
            .keys()
            .chain(b.keys())
            .map(|g| (a.get(g).copied().unwrap_or(0.0) - b.get(g).copied().unwrap_or(0.0)).abs())
            .fold(0.0, f64::max);

        cmp.compared += 1;
        total += diff;
        if cmp.worst_strand.is_none() || diff > cmp.worst_max_abs {
            cmp.worst_max_abs = diff;
            cmp.worst_strand = Some(strand);
        }
    }
    if cmp.compared > 0 {
        cmp.mean_max_abs = total / cmp.compared as f64;
    }
    cmp
}
