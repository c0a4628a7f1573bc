//! Binary hair animation cache.
//!
//! Layout (little endian):
//!
//! ```text
//! i32 n_frames, i32 n_particles
//! per frame:
//!   i32 frame_id
//!   16 × f32 rigid motion (column-major)
//!   n_particles × 3 f32 positions
//!   n_particles × 3 f32 directions
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;

use crate::domain::{Frame, HairFrames, ReferencePose, StrandLayout};
use crate::error::AppError;
use crate::io::binary::{
    FormatError, PREALLOC_LIMIT, read_count, read_matrix4, read_vectors, write_count, write_matrix4,
    write_vectors,
};

/// Load a hair cache whose first stored strand has global index `first_strand`.
pub fn read_hair_cache(path: &Path, particles_per_strand: usize, first_strand: usize) -> Result<HairFrames, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open hair cache '{}': {e}", path.display())))?;
    let frames = decode_hair_cache(&mut BufReader::new(file), particles_per_strand, first_strand)
        .map_err(|e| AppError::new(2, format!("Invalid hair cache '{}': {e}", path.display())))?;

    info!(
        "Loaded {} frames of {} strands ({} particles each) from {}",
        frames.len(),
        frames.layout.strand_count,
        particles_per_strand,
        path.display()
    );
    Ok(frames)
}

pub fn decode_hair_cache<R: Read>(
    reader: &mut R,
    particles_per_strand: usize,
    first_strand: usize,
) -> Result<HairFrames, FormatError> {
    if particles_per_strand == 0 {
        return Err(FormatError::Invalid("particles per strand must be > 0".into()));
    }
    let n_frames = read_count(reader, "frame count")?;
    let n_particles = read_count(reader, "particle count")?;
    if n_particles % particles_per_strand != 0 {
        return Err(FormatError::Invalid(format!(
            "{n_particles} particles is not a multiple of {particles_per_strand} per strand"
        )));
    }
    let layout = StrandLayout::new(particles_per_strand, first_strand, n_particles / particles_per_strand);

    let mut frames = Vec::with_capacity(n_frames.min(PREALLOC_LIMIT));
    for _ in 0..n_frames {
        let id = read_count(reader, "frame id")?;
        let rigid_motion = read_matrix4(reader)?;
        let positions = read_vectors(reader, n_particles)?;
        let directions = read_vectors(reader, n_particles)?;
        frames.push(Frame {
            id,
            rigid_motion,
            positions,
            directions,
        });
    }
    Ok(HairFrames { layout, frames })
}

pub fn write_hair_cache(path: &Path, frames: &HairFrames) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create hair cache '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    encode_hair_cache(&mut writer, frames)
        .and_then(|()| writer.flush().map_err(FormatError::from))
        .map_err(|e| AppError::new(2, format!("Failed to write hair cache '{}': {e}", path.display())))
}

pub fn encode_hair_cache<W: Write>(writer: &mut W, frames: &HairFrames) -> Result<(), FormatError> {
    let n_particles = frames.layout.particle_count();
    write_count(writer, frames.len(), "frame count")?;
    write_count(writer, n_particles, "particle count")?;
    for frame in &frames.frames {
        if frame.positions.len() != n_particles || frame.directions.len() != n_particles {
            return Err(FormatError::Invalid(format!(
                "frame {} has {}/{} particles, layout expects {n_particles}",
                frame.id,
                frame.positions.len(),
                frame.directions.len()
            )));
        }
        write_count(writer, frame.id, "frame id")?;
        write_matrix4(writer, &frame.rigid_motion)?;
        write_vectors(writer, &frame.positions)?;
        write_vectors(writer, &frame.directions)?;
    }
    Ok(())
}

/// Take frame `index` of an animation as the reference pose.
pub fn reference_from(frames: &HairFrames, index: usize) -> Result<ReferencePose, AppError> {
    let frame = frames.frames.get(index).cloned().ok_or_else(|| {
        AppError::new(
            2,
            format!("Reference frame {index} is out of range (cache has {} frames).", frames.len()),
        )
    })?;
    Ok(ReferencePose {
        layout: frames.layout,
        frame,
    })
}
