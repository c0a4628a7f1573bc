//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the estimation code stays clean and testable
//! - output changes are localized

use crate::fit::BatchSummary;
use crate::report::{StrandError, TableStats, TruthComparison};

/// Dataset and grouping facts shown above the estimation totals.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub frames: usize,
    pub strands: usize,
    pub particles_per_strand: usize,
    pub first_strand: usize,
    pub guides: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub groups: usize,
    pub max_candidates: usize,
    pub workers: usize,
}

pub fn format_run_summary(info: &RunInfo, summary: &BatchSummary) -> String {
    let mut out = String::new();

    out.push_str("=== skin - strand skinning weights ===\n");
    out.push_str(&format!(
        "Cache: {} frames | {} strands x {} particles | first strand {}\n",
        info.frames, info.strands, info.particles_per_strand, info.first_strand
    ));
    out.push_str(&format!(
        "Graph: {} nodes, {} edges | {} groups | {} guides (max {} per group)\n",
        info.graph_nodes, info.graph_edges, info.groups, info.guides, info.max_candidates
    ));
    out.push_str(&format!("Task: {} on {} workers\n", summary.task, info.workers));

    out.push_str("\nEstimation:\n");
    out.push_str(&format!(
        "- strands: {} solved, {} failed, {} guides, {} of {} processed{}\n",
        summary.succeeded,
        summary.failed,
        summary.guides,
        summary.processed,
        summary.task.len(),
        if summary.cancelled { " (cancelled)" } else { "" }
    ));
    out.push_str(&format!(
        "- error: {:.6e} -> {:.6e} ({})\n",
        summary.error0,
        summary.error,
        fmt_reduction(summary.error0, summary.error)
    ));
    out.push('\n');

    out
}

pub fn format_table_stats(stats: &TableStats) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Strands: {} | solved {} | unsolved {} | guides {} | pending {}\n",
        stats.strands, stats.solved, stats.unsolved, stats.guides, stats.pending
    ));
    out.push_str(&format!(
        "Error: {:.6e} -> {:.6e} ({})\n",
        stats.error0,
        stats.error,
        fmt_reduction(stats.error0, stats.error)
    ));
    out
}

/// Format the worst-strands table.
pub fn format_worst_strands(rows: &[StrandError]) -> String {
    let mut out = String::new();
    out.push_str("Worst strands (optimized error):\n");
    out.push_str(
        format!(
            "{:>8} {:>6} {:>14} {:>14} {:>10}\n",
            "strand", "guides", "error0", "error", "reduction"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<6} {:-<14} {:-<14} {:-<10}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        out.push_str(&format!(
            "{:>8} {:>6} {:>14.6e} {:>14.6e} {:>9.2}%\n",
            r.strand,
            r.candidates,
            r.error0,
            r.error,
            100.0 * r.reduction()
        ));
    }
    out
}

pub fn format_comparison(cmp: &TruthComparison) -> String {
    match cmp.worst_strand {
        None => "Truth: no strand solved in both tables\n".to_string(),
        Some(strand) => format!(
            "Truth: {} strands compared | mean max |dw| {:.3e} | worst {:.3e} (strand {strand})\n",
            cmp.compared, cmp.mean_max_abs, cmp.worst_max_abs
        ),
    }
}

fn fmt_reduction(error0: f64, error: f64) -> String {
    if error0 > 0.0 {
        format!("{:.2}% reduction", 100.0 * (1.0 - error / error0))
    } else {
        "no baseline".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StrandRange;

    #[test]
    fn summary_mentions_totals_and_cancellation() {
        let mut summary = BatchSummary::empty(StrandRange::new(0, 10));
        summary.error0 = 4.0;
        summary.error = 1.0;
        summary.succeeded = 6;
        summary.guides = 2;
        summary.processed = 8;
        summary.cancelled = true;

        let text = format_run_summary(&RunInfo::default(), &summary);
        assert!(text.contains("6 solved, 0 failed, 2 guides, 8 of 10 processed (cancelled)"), "{text}");
        assert!(text.contains("75.00% reduction"), "{text}");
        assert!(text.contains("Task: [0, 10)"), "{text}");
    }

    #[test]
    fn worst_strand_table_has_one_line_per_row() {
        let rows = vec![StrandError {
            strand: 12,
            candidates: 3,
            error0: 2.0,
            error: 1.0,
        }];
        let text = format_worst_strands(&rows);
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().nth(3).unwrap().contains("50.00%"));
    }

    #[test]
    fn empty_comparison_says_so() {
        assert!(format_comparison(&TruthComparison::default()).contains("no strand"));
    }
}
