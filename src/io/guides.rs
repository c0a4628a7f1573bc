//! Guide motion table (`Bg`) files.
//!
//! Layout (little endian):
//!
//! ```text
//! b"GMOT", u32 version (1), u32 n_frames, u32 n_guides, u32 particles_per_strand
//! n_guides × u32 guide strand ids
//! per frame, per guide, per particle: 16 × f32 (column-major)
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;

use crate::domain::GuideMotionTable;
use crate::error::AppError;
use crate::io::binary::{FormatError, PREALLOC_LIMIT, read_matrix4, read_u32, write_matrix4, write_u32};

pub const GUIDE_MAGIC: [u8; 4] = *b"GMOT";
pub const GUIDE_VERSION: u32 = 1;

pub fn read_guide_table(path: &Path) -> Result<GuideMotionTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open guide table '{}': {e}", path.display())))?;
    let table = decode_guide_table(&mut BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid guide table '{}': {e}", path.display())))?;

    info!(
        "Loaded motions of {} guides over {} frames from {}",
        table.guides().len(),
        table.frame_count(),
        path.display()
    );
    Ok(table)
}

pub fn decode_guide_table<R: Read>(reader: &mut R) -> Result<GuideMotionTable, FormatError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != GUIDE_MAGIC {
        return Err(FormatError::Magic(magic));
    }
    let version = read_u32(reader)?;
    if version != GUIDE_VERSION {
        return Err(FormatError::Version(version));
    }

    let n_frames = read_u32(reader)? as usize;
    let n_guides = read_u32(reader)? as usize;
    let npar = read_u32(reader)? as usize;
    if npar == 0 {
        return Err(FormatError::Invalid("particles per strand must be > 0".into()));
    }

    let guides = (0..n_guides)
        .map(|_| read_u32(reader).map(|g| g as usize))
        .collect::<Result<Vec<_>, _>>()?;

    let per_frame = n_guides
        .checked_mul(npar)
        .ok_or_else(|| FormatError::Invalid(format!("{n_guides} guides × {npar} particles overflows")))?;

    let mut motions = Vec::with_capacity(n_frames.min(PREALLOC_LIMIT));
    for _ in 0..n_frames {
        let frame = (0..per_frame)
            .map(|_| read_matrix4(reader))
            .collect::<Result<Vec<_>, _>>()?;
        motions.push(frame);
    }

    GuideMotionTable::new(npar, guides, motions)
        .ok_or_else(|| FormatError::Invalid("duplicate guide strand id".into()))
}

pub fn write_guide_table(path: &Path, table: &GuideMotionTable) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create guide table '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    encode_guide_table(&mut writer, table)
        .and_then(|()| writer.flush().map_err(FormatError::from))
        .map_err(|e| AppError::new(2, format!("Failed to write guide table '{}': {e}", path.display())))
}

pub fn encode_guide_table<W: Write>(writer: &mut W, table: &GuideMotionTable) -> Result<(), FormatError> {
    let as_u32 = |v: usize, what: &str| {
        u32::try_from(v).map_err(|_| FormatError::Invalid(format!("{what} {v} does not fit in u32")))
    };

    writer.write_all(&GUIDE_MAGIC)?;
    write_u32(writer, GUIDE_VERSION)?;
    write_u32(writer, as_u32(table.frame_count(), "frame count")?)?;
    write_u32(writer, as_u32(table.guides().len(), "guide count")?)?;
    write_u32(writer, as_u32(table.particles_per_strand, "particles per strand")?)?;
    for &g in table.guides() {
        write_u32(writer, as_u32(g, "guide id")?)?;
    }
    for f in 0..table.frame_count() {
        for m in table.frame_motions(f).unwrap_or_default() {
            write_matrix4(writer, m)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix4, Translation3};

    fn table() -> GuideMotionTable {
        let motions = (0..2)
            .map(|f| {
                (0..6)
                    .map(|i| Translation3::new(f as f64, i as f64, 0.5).to_homogeneous())
                    .collect()
            })
            .collect();
        GuideMotionTable::new(3, vec![4, 9], motions).unwrap()
    }

    #[test]
    fn guide_table_round_trips() {
        let original = table();
        let mut bytes = Vec::new();
        encode_guide_table(&mut bytes, &original).unwrap();
        assert_eq!(&bytes[..4], b"GMOT");

        let back = decode_guide_table(&mut bytes.as_slice()).unwrap();
        assert_eq!(back.guides(), &[4, 9]);
        assert_eq!(back.frame_count(), 2);
        assert_eq!(back.particles_per_strand, 3);
        assert_eq!(back.motion(1, 9).unwrap()[2], Translation3::new(1.0, 5.0, 0.5).to_homogeneous());
        assert!(back.motion(0, 5).is_none());
    }

    #[test]
    fn wrong_magic_and_version_are_rejected() {
        let mut bytes = Vec::new();
        encode_guide_table(&mut bytes, &table()).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(decode_guide_table(&mut bad_magic.as_slice()), Err(FormatError::Magic(_))));

        let mut bad_version = bytes;
        bad_version[4] = 7;
        assert!(matches!(
            decode_guide_table(&mut bad_version.as_slice()),
            Err(FormatError::Version(7))
        ));
    }

    #[test]
    fn duplicate_guides_are_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GMOT");
        for v in [1u32, 1, 2, 1, 3, 3] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for _ in 0..2 {
            write_matrix4(&mut bytes, &Matrix4::identity()).unwrap();
        }
        assert!(matches!(decode_guide_table(&mut bytes.as_slice()), Err(FormatError::Invalid(_))));
    }

    fn header(counts: [u32; 3]) -> Vec<u8> {
        let mut bytes = b"GMOT".to_vec();
        for v in [GUIDE_VERSION, counts[0], counts[1], counts[2]] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn oversized_header_counts_fail_cleanly() {
        // Frames, guides and particles far beyond what the file holds.
        let mut bytes = header([u32::MAX, 1, 3]);
        bytes.extend_from_slice(&4u32.to_le_bytes());
        assert!(matches!(decode_guide_table(&mut bytes.as_slice()), Err(FormatError::Truncated)));

        let bytes = header([1, u32::MAX, u32::MAX]);
        assert!(matches!(
            decode_guide_table(&mut bytes.as_slice()),
            Err(FormatError::Truncated | FormatError::Invalid(_))
        ));
    }
}
