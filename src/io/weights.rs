//! Read/write weight table JSON files.
//!
//! The schema is defined by `domain::WeightFile`: run metadata (tool, time,
//! task, totals) plus one tagged entry per strand.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::domain::{WeightFile, WeightTable};
use crate::error::AppError;
use crate::fit::BatchSummary;

/// Wrap a finished table with the run's totals and a timestamp.
pub fn weight_file(table: WeightTable, summary: &BatchSummary) -> WeightFile {
    WeightFile {
        tool: format!("skin {}", env!("CARGO_PKG_VERSION")),
        generated: chrono::Local::now().to_rfc3339(),
        task: summary.task,
        error0: summary.error0,
        error: summary.error,
        succeeded: summary.succeeded,
        failed: summary.failed,
        table,
    }
}

pub fn write_weight_json(path: &Path, weights: &WeightFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create weight JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, weights)
        .map_err(|e| AppError::new(2, format!("Failed to write weight JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write weight JSON: {e}")))?;
    Ok(())
}

pub fn read_weight_json(path: &Path) -> Result<WeightFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open weight JSON '{}': {e}", path.display())))?;
    let weights: WeightFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid weight JSON: {e}")))?;
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StrandRange, StrandWeights, WeightEntry};

    #[test]
    fn weight_file_reloads_into_the_same_table() {
        let mut table = WeightTable::new(25, 3);
        table.entries[0] = WeightEntry::Guide;
        table.entries[1] = WeightEntry::Solved(StrandWeights {
            candidates: vec![0, 2],
            weights: vec![0.125, 0.875],
            error0: 3.5,
            error: 0.25,
        });
        table.entries[2] = WeightEntry::Unsolved {
            reason: "singular".into(),
        };
        let mut summary = BatchSummary::empty(StrandRange::new(0, 3));
        summary.error0 = 3.5;
        summary.error = 0.25;
        summary.succeeded = 1;
        summary.failed = 1;

        let file = weight_file(table.clone(), &summary);
        let path = std::env::temp_dir().join(format!("strand-skin-weights-{}.json", std::process::id()));
        write_weight_json(&path, &file).unwrap();
        let back = read_weight_json(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(back.table, table);
        assert_eq!(back.task, StrandRange::new(0, 3));
        assert_eq!((back.succeeded, back.failed), (1, 1));
        assert!(back.tool.starts_with("skin "));
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = read_weight_json(Path::new("/nonexistent/weights.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
