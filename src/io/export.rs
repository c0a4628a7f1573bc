//! Export per-strand results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream
//! scripts: one row per strand, candidates and weights joined with `;`.

use std::path::Path;

use serde::Serialize;

use crate::domain::{WeightEntry, WeightTable};
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct StrandRow {
    strand: usize,
    kind: &'static str,
    candidates: String,
    weights: String,
    error0: Option<f64>,
    error: Option<f64>,
    note: String,
}

fn row(strand: usize, entry: &WeightEntry) -> StrandRow {
    let mut row = StrandRow {
        strand,
        kind: "",
        candidates: String::new(),
        weights: String::new(),
        error0: None,
        error: None,
        note: String::new(),
    };
    match entry {
        WeightEntry::Pending => row.kind = "pending",
        WeightEntry::Guide => row.kind = "guide",
        WeightEntry::Solved(w) => {
            row.kind = "solved";
            row.candidates = join(w.candidates.iter().map(|c| c.to_string()));
            row.weights = join(w.weights.iter().map(|v| format!("{v:.10}")));
            row.error0 = Some(w.error0);
            row.error = Some(w.error);
        }
        WeightEntry::Unsolved { reason } => {
            row.kind = "unsolved";
            row.note = reason.clone();
        }
    }
    row
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(";")
}

/// Write one row per strand of `table`.
pub fn write_weights_csv(path: &Path, table: &WeightTable) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    for (strand, entry) in table.entries.iter().enumerate() {
        writer
            .serialize(row(strand, entry))
            .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV: {e}")))?;
    Ok(())
}
