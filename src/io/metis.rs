//! METIS graph export and partition import.
//!
//! The graph file is what `gpmetis` reads: a header `n m 001` (edge weights
//! only), then one line per node listing `neighbour weight` pairs with 1-based
//! neighbour ids. The partition file `gpmetis` writes back holds one group id
//! per line, in node order.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::AppError;
use crate::graph::ProximityGraph;

pub fn write_metis_graph(path: &Path, graph: &ProximityGraph, n_step: u32) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create METIS graph '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    encode_metis_graph(&mut writer, graph, n_step)
        .and_then(|()| writer.flush())
        .map_err(|e| AppError::new(2, format!("Failed to write METIS graph '{}': {e}", path.display())))?;

    info!(
        "Wrote METIS graph with {} nodes and {} edges to {}",
        graph.node_count(),
        graph.edge_count(),
        path.display()
    );
    Ok(())
}

pub fn encode_metis_graph<W: Write>(writer: &mut W, graph: &ProximityGraph, n_step: u32) -> std::io::Result<()> {
    let weights = graph.normalized_weights(n_step);
    let mut adjacency = vec![Vec::new(); graph.node_count()];
    for (&(a, b), &w) in &weights {
        adjacency[a].push((b, w));
        adjacency[b].push((a, w));
    }

    writeln!(writer, "{} {} 001", graph.node_count(), weights.len())?;
    for neighbours in &mut adjacency {
        neighbours.sort_by_key(|&(n, _)| n);
        let line: Vec<String> = neighbours
            .iter()
            .map(|&(n, w)| format!("{} {w}", n + 1))
            .collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    Ok(())
}

pub fn read_partition(path: &Path) -> Result<Vec<usize>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open partition file '{}': {e}", path.display())))?;
    let partition = parse_partition(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid partition file '{}': {e}", path.display())))?;
    info!("Loaded partition of {} nodes from {}", partition.len(), path.display());
    Ok(partition)
}

/// Parse one group id per line; blank lines are skipped.
pub fn parse_partition<R: BufRead>(reader: R) -> Result<Vec<usize>, String> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| e.to_string())?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let group = trimmed
            .parse::<usize>()
            .map_err(|e| format!("line {}: '{trimmed}': {e}", idx + 1))?;
        out.push(group);
    }
    Ok(out)
}
