//! Saving and loading parameter tensors.
//!
//! # `.bpat` Format
//!
//! A `.bpat` file stores one or more tensors back to back:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ Header     │ Tensor N   │ Tensor N+1 …        │
//! ├────────────┼────────────┼─────────────────────┤
//! │ "bpat"[4]  │ u64: ndim  │ u64: ndim           │
//! │ u8: count  │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. Data is row-major.
//!
//! # Limitations
//! - Maximum 255 tensors per file (`u8` count)
//! - No per-tensor names; order is the only identity
//!
//! # Example
//!
//! ```rust
//! use briny_nn::tensor;
//! use briny_nn::modelio::{read_tensors, write_tensors};
//!
//! let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let mut bytes = Vec::new();
//! write_tensors(&mut bytes, [&t]).unwrap();
//!
//! let back = read_tensors(&mut bytes.as_slice()).unwrap();
//! assert_eq!(back, vec![t]);
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::{TrustedData, Validate, ValidationError};

use crate::error::{Error, Result};
use crate::tensors::Tensor;

const BPAT_MAGIC: &[u8; 4] = b"bpat";

/// Upper bound on elements preallocated before the data is actually read.
const PREALLOC_LIMIT: usize = 1 << 20;

/// A tensor record as read from disk, before it is trusted.
struct PackedTensor {
    shape: Vec<u64>,
    data: Vec<f64>,
}

impl PackedTensor {
    /// Element count implied by the shape, or `None` when the shape cannot
    /// describe a tensor.
    fn declared_len(&self) -> Option<usize> {
        if self.shape.is_empty() {
            return None;
        }
        self.shape.iter().try_fold(1usize, |acc, &d| match usize::try_from(d) {
            Ok(0) | Err(_) => None,
            Ok(d) => acc.checked_mul(d),
        })
    }
}

impl Validate for PackedTensor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        match self.declared_len() {
            Some(n) if n == self.data.len() => Ok(()),
            _ => Err(ValidationError),
        }
    }
}

/// Encodes `tensors` into `writer`.
///
/// # Errors
/// - [`Error::InvalidParameter`] for more than 255 tensors.
/// - [`Error::Io`] if writing fails.
pub fn write_tensors<'a, W: Write>(writer: &mut W, tensors: impl IntoIterator<Item = &'a Tensor>) -> Result<()> {
    let tensors: Vec<&Tensor> = tensors.into_iter().collect();
    let count = u8::try_from(tensors.len())
        .map_err(|_| Error::InvalidParameter(format!("cannot store {} tensors, limit is 255", tensors.len())))?;

    writer.write_all(BPAT_MAGIC)?;
    writer.write_all(&[count])?;
    for tensor in tensors {
        writer.write_all(&(tensor.rank() as u64).to_le_bytes())?;
        for &dim in tensor.shape() {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }
        for val in tensor.iter() {
            writer.write_all(&val.to_le_bytes())?;
        }
    }
    Ok(())
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptModel(msg.into())
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(|e| truncated(e, what))?;
    Ok(u64::from_le_bytes(buf))
}

fn truncated(e: io::Error, what: &str) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        corrupt(format!("file ends inside {what}"))
    } else {
        Error::Io(e)
    }
}

/// Decodes every tensor from `reader`.
///
/// Each record is checked through [`briny`]'s [`Validate`] before a tensor is
/// built from it.
///
/// # Errors
/// - [`Error::CorruptModel`] for a bad magic header, zero rank, zero
///   dimensions, overflowing sizes, truncated data or trailing bytes.
/// - [`Error::Io`] for other read failures.
pub fn read_tensors<R: Read>(reader: &mut R) -> Result<Vec<Tensor>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| truncated(e, "header"))?;
    if &magic != BPAT_MAGIC {
        return Err(corrupt("invalid magic header"));
    }

    let mut count = [0u8; 1];
    reader.read_exact(&mut count).map_err(|e| truncated(e, "header"))?;
    let count = count[0] as usize;

    let mut tensors = Vec::with_capacity(count);
    for t in 0..count {
        let rank = read_u64(reader, "tensor rank")?;
        let mut packed = PackedTensor { shape: Vec::new(), data: Vec::new() };
        for _ in 0..rank {
            packed.shape.push(read_u64(reader, "tensor shape")?);
        }

        if let Some(size) = packed.declared_len() {
            packed.data.reserve(size.min(PREALLOC_LIMIT));
            let mut buf = [0u8; 8];
            for _ in 0..size {
                reader.read_exact(&mut buf).map_err(|e| truncated(e, "tensor data"))?;
                packed.data.push(f64::from_le_bytes(buf));
            }
        }

        let shape_desc = format!("{:?}", packed.shape);
        let trusted = TrustedData::new(packed)
            .map_err(|_| corrupt(format!("tensor {t} has invalid shape {shape_desc}")))?;
        let PackedTensor { shape, data } = trusted.into_inner();
        let shape: Vec<usize> = shape.into_iter().map(|d| d as usize).collect();
        tensors.push(Tensor::from_vec(&shape, data)?);
    }

    let mut rest = [0u8; 1];
    if reader.read(&mut rest)? != 0 {
        return Err(corrupt("trailing bytes after last tensor"));
    }
    Ok(tensors)
}

/// Saves tensors to a `.bpat` file, replacing it if present.
pub fn save_tensors<'a>(path: impl AsRef<Path>, tensors: impl IntoIterator<Item = &'a Tensor>) -> Result<()> {
    let path = path.as_ref();
    let mut file = BufWriter::new(File::create(path)?);
    write_tensors(&mut file, tensors)?;
    file.flush()?;
    tracing::debug!(path = %path.display(), "saved tensors");
    Ok(())
}

/// Loads every tensor from a `.bpat` file.
pub fn load_tensors(path: impl AsRef<Path>) -> Result<Vec<Tensor>> {
    let path = path.as_ref();
    let tensors = read_tensors(&mut BufReader::new(File::open(path)?))?;
    tracing::debug!(path = %path.display(), count = tensors.len(), "loaded tensors");
    Ok(tensors)
}
