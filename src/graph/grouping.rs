//! Strand grouping: strand → group, group → candidate guides.
//!
//! A partition of the (possibly coarsened) strand graph assigns every strand a
//! group; the candidate guides of a strand are the guide strands that landed in
//! the same group. The partition itself comes either from the deterministic
//! label propagation below or from an external METIS run.

use std::collections::BTreeMap;

use log::{debug, info};
use thiserror::Error;

use crate::domain::{GuideMotionTable, StrandLayout};
use crate::graph::proximity::ProximityGraph;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupingError {
    #[error("coarsening factor must be >= 1")]
    InvalidFactor,
    #[error("partition has {found} entries but the coarse graph has {expected} nodes")]
    PartitionSize { expected: usize, found: usize },
    #[error("group label {group} is out of range for a partition of {limit} nodes")]
    GroupLabel { group: usize, limit: usize },
    #[error("strand {strand} belongs to group {group}, which has no guide strands")]
    DegenerateGroup { strand: usize, group: usize },
    #[error("strand {0} is not covered by the grouping")]
    UnknownStrand(usize),
}

/// The strand grouping index (`hairGroup` / `groupGuideMap`).
#[derive(Debug, Clone, PartialEq)]
pub struct StrandGrouping {
    first_strand: usize,
    strand_group: Vec<usize>,
    group_guides: Vec<Vec<usize>>,
}

impl StrandGrouping {
    /// Build the index from a partition of the coarse strand graph.
    ///
    /// Strand `s` belongs to group `partition[(s - first_strand) / factor]`.
    /// Fails if any ordinary strand ends up in a group without guides.
    pub fn from_partition(
        layout: &StrandLayout,
        partition: &[usize],
        factor: usize,
        guides: &GuideMotionTable,
    ) -> Result<Self, GroupingError> {
        if factor == 0 {
            return Err(GroupingError::InvalidFactor);
        }
        let expected = layout.strand_count.div_ceil(factor);
        if partition.len() != expected {
            return Err(GroupingError::PartitionSize {
                expected,
                found: partition.len(),
            });
        }

        if let Some(&group) = partition.iter().find(|&&g| g >= partition.len()) {
            return Err(GroupingError::GroupLabel {
                group,
                limit: partition.len(),
            });
        }

        let group_count = partition.iter().max().map_or(0, |&g| g + 1);
        let mut group_guides = vec![Vec::new(); group_count];
        let mut strand_group = Vec::with_capacity(layout.strand_count);

        for (local, strand) in layout.strands().enumerate() {
            let group = partition[local / factor];
            strand_group.push(group);
            if guides.is_guide(strand) {
                group_guides[group].push(strand);
            }
        }

        let grouping = Self {
            first_strand: layout.first_strand,
            strand_group,
            group_guides,
        };

        for strand in layout.strands() {
            if guides.is_guide(strand) {
                continue;
            }
            let group = grouping.strand_group[strand - grouping.first_strand];
            if grouping.group_guides[group].is_empty() {
                return Err(GroupingError::DegenerateGroup { strand, group });
            }
        }

        info!(
            "Grouped {} strands into {} groups ({} with guides)",
            grouping.strand_group.len(),
            grouping.group_count(),
            grouping.group_guides.iter().filter(|g| !g.is_empty()).count()
        );
        Ok(grouping)
    }

    pub fn group_count(&self) -> usize {
        self.group_guides.len()
    }

    pub fn group_of(&self, strand: usize) -> Option<usize> {
        strand
            .checked_sub(self.first_strand)
            .and_then(|local| self.strand_group.get(local))
            .copied()
    }

    /// Candidate guides of `strand`, ascending.
    pub fn candidates(&self, strand: usize) -> Result<&[usize], GroupingError> {
        let group = self
            .group_of(strand)
            .ok_or(GroupingError::UnknownStrand(strand))?;
        Ok(&self.group_guides[group])
    }

    /// Size of the largest candidate set.
    pub fn max_candidates(&self) -> usize {
        self.group_guides.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Deterministic weighted label propagation.
///
/// Nodes are visited in index order and adopt the label with the largest summed
/// edge weight among their neighbours (smallest label on ties). Isolated nodes
/// keep their own label. Labels are compacted to `0..k` by first appearance.
pub fn label_propagation(graph: &ProximityGraph, max_iterations: usize) -> Vec<usize> {
    let adjacency = graph.adjacency();
    let mut labels: Vec<usize> = (0..graph.node_count()).collect();
    let mut scores: BTreeMap<usize, f64> = BTreeMap::new();

    for iteration in 0..max_iterations {
        let mut changed = 0usize;
        for (node, neighbours) in adjacency.iter().enumerate() {
            if neighbours.is_empty() {
                continue;
            }
            scores.clear();
            for &(other, w) in neighbours {
                *scores.entry(labels[other]).or_insert(0.0) += w;
            }

            let mut best = labels[node];
            let mut best_score = f64::NEG_INFINITY;
            for (&label, &score) in &scores {
                if score > best_score {
                    best = label;
                    best_score = score;
                }
            }
            if best != labels[node] {
                labels[node] = best;
                changed += 1;
            }
        }
        debug!("label propagation iteration {iteration}: {changed} labels changed");
        if changed == 0 {
            break;
        }
    }

    let mut compact = BTreeMap::new();
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        let next = compact.len();
        out.push(*compact.entry(label).or_insert(next));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix4;

    fn guides(ids: &[usize]) -> GuideMotionTable {
        GuideMotionTable::new(1, ids.to_vec(), vec![vec![Matrix4::identity(); ids.len()]]).unwrap()
    }

    fn two_cliques() -> ProximityGraph {
        ProximityGraph::from_edges(
            6,
            [
                (0, 1, 5.0),
                (0, 2, 5.0),
                (1, 2, 5.0),
                (3, 4, 5.0),
                (3, 5, 5.0),
                (4, 5, 5.0),
                (2, 3, 1.0),
            ],
        )
    }

    #[test]
    fn label_propagation_separates_weakly_linked_cliques() {
        let labels = label_propagation(&two_cliques(), 20);
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn label_propagation_keeps_isolated_nodes_apart() {
        let graph = ProximityGraph::from_edges(4, [(0, 1, 1.0)]);
        let labels = label_propagation(&graph, 10);
        assert_eq!(labels, vec![0, 0, 1, 2]);
    }

    #[test]
    fn candidates_are_the_guides_of_the_strand_group() {
        let layout = StrandLayout::new(25, 0, 6);
        let grouping =
            StrandGrouping::from_partition(&layout, &[0, 0, 0, 1, 1, 1], 1, &guides(&[0, 2, 4])).unwrap();

        assert_eq!(grouping.group_count(), 2);
        assert_eq!(grouping.candidates(1).unwrap(), &[0, 2]);
        assert_eq!(grouping.candidates(5).unwrap(), &[4]);
        assert_eq!(grouping.candidates(6), Err(GroupingError::UnknownStrand(6)));
        assert_eq!(grouping.max_candidates(), 2);
    }

    #[test]
    fn coarse_partition_is_expanded_by_factor_and_offset() {
        let layout = StrandLayout::new(25, 10, 5);
        let grouping = StrandGrouping::from_partition(&layout, &[1, 0, 1], 2, &guides(&[10, 12])).unwrap();

        assert_eq!(grouping.group_of(11), Some(1));
        assert_eq!(grouping.group_of(13), Some(0));
        assert_eq!(grouping.group_of(14), Some(1));
        assert_eq!(grouping.candidates(14).unwrap(), &[10]);
        assert_eq!(grouping.candidates(13).unwrap(), &[12]);
    }

    #[test]
    fn group_without_guides_is_an_error() {
        let layout = StrandLayout::new(25, 0, 4);
        let err = StrandGrouping::from_partition(&layout, &[0, 0, 1, 1], 1, &guides(&[0])).unwrap_err();
        assert_eq!(err, GroupingError::DegenerateGroup { strand: 2, group: 1 });
    }

    #[test]
    fn partition_length_must_match_coarse_graph() {
        let layout = StrandLayout::new(25, 0, 5);
        let err = StrandGrouping::from_partition(&layout, &[0, 0], 2, &guides(&[0])).unwrap_err();
        assert_eq!(err, GroupingError::PartitionSize { expected: 3, found: 2 });
    }

    #[test]
    fn out_of_range_group_label_is_rejected() {
        let layout = StrandLayout::new(25, 0, 3);
        let err = StrandGrouping::from_partition(&layout, &[0, usize::MAX, 1], 1, &guides(&[0])).unwrap_err();
        assert_eq!(
            err,
            GroupingError::GroupLabel {
                group: usize::MAX,
                limit: 3
            }
        );
    }
}
