//! Dense `f64` array blobs in the NumPy `.npy` layout.
//!
//! The blob is self-describing: a short text header carries the element type, the memory
//! order and the shape, followed by the raw little-endian values in row-major order.
//! Tables written here can be opened with `numpy.load` and vice versa, as long as they
//! hold `float64` values in C order.
//!
//! # Layout
//!
//! 1. **Magic**: `\x93NUMPY` (6 bytes)
//! 2. **Version**: major, minor (2 bytes), 1.0 on write; 1.x, 2.x and 3.x accepted on read
//! 3. **Header length**: `u16` little-endian for 1.x, `u32` for 2.x and 3.x
//! 4. **Header**: `{'descr': '<f8', 'fortran_order': False, 'shape': (3, 1), }`, space
//!    padded and terminated by a newline so that the data starts at a multiple of 64
//! 5. **Data**: `f64` little-endian values

use std::io::{Read, Write};
use crate::error::{KinematicsError, Result};

pub const NPY_MAGIC: [u8; 6] = *b"\x93NUMPY";

/// Data start is aligned to this many bytes.
const ALIGNMENT: usize = 64;

/// Longest header accepted on read. Real headers are well under a kilobyte.
const MAX_HEADER_LEN: usize = 64 * 1024;

/// Array read from a blob. The data length always equals the product of the shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

fn format_header(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    let shape_text = match dims.len() {
        1 => format!("({},)", dims[0]),
        _ => format!("({})", dims.join(", ")),
    };
    format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}", shape_text)
}

/// Writes the values with the given shape. The caller guarantees that `data.len()` is the
/// product of `shape`.
pub fn write_f64<W: Write>(writer: &mut W, shape: &[usize], data: &[f64]) -> Result<()> {
    debug_assert_eq!(shape.iter().product::<usize>(), data.len());
    let mut header = format_header(shape);
    // magic + version + u16 length + header + newline
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| KinematicsError::Format(format!("shape {:?} does not fit the header", shape)))?;

    writer.write_all(&NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    let mut bytes = Vec::with_capacity(data.len() * 8);
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    writer.write_all(&bytes)?;
    Ok(())
}

/// Reads a complete blob. Only little-endian `float64` arrays in C order are accepted.
pub fn read_f64<R: Read>(reader: &mut R) -> Result<NpyArray> {
    let mut preamble = [0u8; 8];
    reader.read_exact(&mut preamble)?;
    if preamble[..6] != NPY_MAGIC {
        return Err(KinematicsError::Format("not an npy blob (bad magic)".to_string()));
    }
    let header_len = match preamble[6] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        major => {
            return Err(KinematicsError::Format(format!("unsupported npy version {}.{}", major, preamble[7])));
        }
    };

    if header_len > MAX_HEADER_LEN {
        return Err(KinematicsError::Format(format!("header length {} is implausible", header_len)));
    }
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header)
        .map_err(|_| KinematicsError::Format("header is not text".to_string()))?;

    let descr = header_value(&header, "descr")?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    if descr != "<f8" {
        return Err(KinematicsError::Format(format!("unsupported element type {}", descr)));
    }
    if header_value(&header, "fortran_order")? != "False" {
        return Err(KinematicsError::Format("Fortran order is not supported".to_string()));
    }
    let shape = parse_shape(header_value(&header, "shape")?)?;

    let count = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| KinematicsError::Format(format!("shape {:?} is too large", shape)))?;
    let byte_count = count.checked_mul(8)
        .ok_or_else(|| KinematicsError::Format(format!("shape {:?} is too large", shape)))?;
    let mut bytes = Vec::new();
    reader.take(byte_count as u64).read_to_end(&mut bytes)?;
    if bytes.len() != byte_count {
        return Err(KinematicsError::Format(format!(
            "expected {} values, blob holds {}", count, bytes.len() / 8)));
    }
    let data = bytes.chunks_exact(8)
        .map(|chunk| {
            let mut value = [0u8; 8];
            value.copy_from_slice(chunk);
            f64::from_le_bytes(value)
        })
        .collect();
    Ok(NpyArray { shape, data })
}

/// Raw text of the value stored under `key` in the header dictionary.
fn header_value<'h>(header: &'h str, key: &str) -> Result<&'h str> {
    let missing = || KinematicsError::Format(format!("header has no '{}'", key));
    let pattern = format!("'{}':", key);
    let start = header.find(&pattern).ok_or_else(missing)? + pattern.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    };
    Ok(rest[..end.ok_or_else(missing)?].trim())
}

fn parse_shape(text: &str) -> Result<Vec<usize>> {
    let inner = text.strip_prefix('(').and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| KinematicsError::Format(format!("bad shape {}", text)))?;
    inner.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>()
            .map_err(|_| KinematicsError::Format(format!("bad dimension {} in shape {}", d, text))))
        .collect()
}
