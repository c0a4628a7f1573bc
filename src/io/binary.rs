//! Little-endian primitives shared by the binary formats.

use std::io::{Read, Write};

use nalgebra::{Matrix4, Vector3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of file")]
    Truncated,
    #[error(transparent)]
    Io(std::io::Error),
    #[error("bad magic {0:?}")]
    Magic([u8; 4]),
    #[error("unsupported format version {0}")]
    Version(u32),
    #[error("{0}")]
    Invalid(String),
}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FormatError::Truncated
        } else {
            FormatError::Io(e)
        }
    }
}

pub(crate) fn read_i32<R: Read>(reader: &mut R) -> Result<i32, FormatError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Upper bound on capacity reserved from a header count before the data behind it is read.
pub(crate) const PREALLOC_LIMIT: usize = 1024;

/// Read a non-negative `i32` count.
pub(crate) fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize, FormatError> {
    let value = read_i32(reader)?;
    usize::try_from(value).map_err(|_| FormatError::Invalid(format!("negative {what}: {value}")))
}

pub(crate) fn read_f32s<R: Read, const N: usize>(reader: &mut R) -> Result<[f64; N], FormatError> {
    let mut out = [0.0; N];
    let mut buf = [0u8; 4];
    for v in out.iter_mut() {
        reader.read_exact(&mut buf)?;
        *v = f64::from(f32::from_le_bytes(buf));
    }
    Ok(out)
}

pub(crate) fn read_vectors<R: Read>(reader: &mut R, count: usize) -> Result<Vec<Vector3<f64>>, FormatError> {
    (0..count)
        .map(|_| read_f32s::<_, 3>(reader).map(|[x, y, z]| Vector3::new(x, y, z)))
        .collect()
}

/// 16 floats, column-major.
pub(crate) fn read_matrix4<R: Read>(reader: &mut R) -> Result<Matrix4<f64>, FormatError> {
    let values = read_f32s::<_, 16>(reader)?;
    Ok(Matrix4::from_column_slice(&values))
}

pub(crate) fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<(), FormatError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<(), FormatError> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_count<W: Write>(writer: &mut W, value: usize, what: &str) -> Result<(), FormatError> {
    let value = i32::try_from(value).map_err(|_| FormatError::Invalid(format!("{what} {value} does not fit in i32")))?;
    write_i32(writer, value)
}

pub(crate) fn write_vectors<W: Write>(writer: &mut W, values: &[Vector3<f64>]) -> Result<(), FormatError> {
    for v in values {
        for c in v.iter() {
            writer.write_all(&(*c as f32).to_le_bytes())?;
        }
    }
    Ok(())
}

pub(crate) fn write_matrix4<W: Write>(writer: &mut W, m: &Matrix4<f64>) -> Result<(), FormatError> {
    // nalgebra iterates in column-major order.
    for c in m.iter() {
        writer.write_all(&(*c as f32).to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_is_stored_column_major() {
        let m = Matrix4::new(
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0, //
            9.0, 10.0, 11.0, 12.0, //
            13.0, 14.0, 15.0, 16.0,
        );
        let mut bytes = Vec::new();
        write_matrix4(&mut bytes, &m).unwrap();
        assert_eq!(f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 5.0);
        assert_eq!(read_matrix4(&mut bytes.as_slice()).unwrap(), m);
    }

    #[test]
    fn short_input_is_truncated() {
        let bytes = [1u8, 0];
        assert!(matches!(read_u32(&mut &bytes[..]), Err(FormatError::Truncated)));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let bytes = (-3i32).to_le_bytes();
        assert!(matches!(read_count(&mut &bytes[..], "frames"), Err(FormatError::Invalid(_))));
    }
}
