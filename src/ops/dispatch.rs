//! Tensor-level operator engine.
//!
//! Each function validates shapes, snapshots its inputs, runs the matching
//! [`cpu`](super::cpu) kernel and writes the result back. Snapshotting first
//! means a destination may safely alias one of the inputs.
//!
//! The `_into` variants **accumulate** into `dest`; the allocating variants
//! start from zeros.
//!
//! # Example
//! ```rust
//! use briny_nn::{tensor, ops::dispatch::{correlate2d, convolve2d, rotate180}};
//!
//! let x = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
//! let k = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let conv = convolve2d(&x, &k).unwrap();
//! let corr = correlate2d(&x, &rotate180(&k).unwrap()).unwrap();
//! assert_eq!(conv, corr);
//! ```

use super::cpu;
use crate::backend;
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// `(rows, cols)` of a rank-1 (row vector) or rank-2 tensor.
fn matrix_dims(t: &Tensor) -> Result<(usize, usize)> {
    match *t.shape() {
        [n] => Ok((1, n)),
        [r, c] => Ok((r, c)),
        _ => Err(Error::mismatch("matmul", &[0, 0], t.shape())),
    }
}

fn plane_dims(op: &'static str, t: &Tensor) -> Result<(usize, usize)> {
    match *t.shape() {
        [h, w] => Ok((h, w)),
        _ => Err(Error::mismatch(op, &[0, 0], t.shape())),
    }
}

fn expect_shape(op: &'static str, dest: &Tensor, expected: &[usize]) -> Result<()> {
    if dest.shape() != expected {
        return Err(Error::mismatch(op, expected, dest.shape()));
    }
    Ok(())
}

/// Shape of `a · b`: rank 1 when `a` is a row vector.
fn matmul_shape(a: &Tensor, b: &Tensor) -> Result<Vec<usize>> {
    let (ra, ca) = matrix_dims(a)?;
    let (rb, cb) = matrix_dims(b)?;
    if ca != rb {
        return Err(Error::mismatch("matmul", &[ca, cb], &[rb, cb]));
    }
    Ok(if a.rank() == 1 { vec![cb] } else { vec![ra, cb] })
}

/// `dest += a · b`.
///
/// Rank-1 operands are treated as `1×n` rows. `dest` must be `(rows(a), cols(b))`,
/// or `(cols(b))` when `a` is rank 1.
///
/// # Errors
/// [`Error::ShapeMismatch`] for ranks above 2, incompatible inner dimensions,
/// or a wrongly shaped destination.
pub fn mat_mul_into(a: &Tensor, b: &Tensor, dest: &mut Tensor) -> Result<()> {
    let expected = matmul_shape(a, b)?;
    expect_shape("matmul", dest, &expected)?;
    let (m, k) = matrix_dims(a)?;
    let (_, n) = matrix_dims(b)?;

    let (av, bv) = (a.to_vec(), b.to_vec());
    let mut out = dest.to_vec();
    tracing::trace!(m, k, n, "matmul");
    cpu::matmul_acc(&av, &bv, &mut out, m, k, n, backend::parallel());
    dest.write_values(&out);
    Ok(())
}

/// `a · b` into a fresh tensor.
pub fn mat_mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let mut dest = Tensor::zeros(&matmul_shape(a, b)?)?;
    mat_mul_into(a, b, &mut dest)?;
    Ok(dest)
}

type PlaneKernel = fn(&[f64], (usize, usize), &[f64], (usize, usize), &mut [f64]);

fn windowed_into(
    op: &'static str,
    x: &Tensor,
    k: &Tensor,
    dest: &mut Tensor,
    out_shape: [usize; 2],
    kernel: PlaneKernel,
) -> Result<()> {
    let xd = plane_dims(op, x)?;
    let kd = plane_dims(op, k)?;
    expect_shape(op, dest, &out_shape)?;
    let (xv, kv) = (x.to_vec(), k.to_vec());
    let mut out = dest.to_vec();
    kernel(&xv, xd, &kv, kd, &mut out);
    dest.write_values(&out);
    Ok(())
}

fn valid_shape(op: &'static str, x: &Tensor, k: &Tensor) -> Result<[usize; 2]> {
    let (h, w) = plane_dims(op, x)?;
    let (kh, kw) = plane_dims(op, k)?;
    match (cpu::valid_dim(h, kh), cpu::valid_dim(w, kw)) {
        (Some(oh), Some(ow)) => Ok([oh, ow]),
        _ => Err(Error::mismatch(op, &[h, w], &[kh, kw])),
    }
}

fn full_shape(op: &'static str, x: &Tensor, k: &Tensor) -> Result<[usize; 2]> {
    let (h, w) = plane_dims(op, x)?;
    let (kh, kw) = plane_dims(op, k)?;
    Ok([cpu::full_dim(h, kh), cpu::full_dim(w, kw)])
}

/// `dest += corr(x, k)` in "valid" mode.
///
/// `dest` must be `(H-kh+1, W-kw+1)`. The destination is not zeroed, which lets
/// gradient code sum correlations from several channels into one tensor.
pub fn correlate2d_into(x: &Tensor, k: &Tensor, dest: &mut Tensor) -> Result<()> {
    let shape = valid_shape("correlate2d", x, k)?;
    windowed_into("correlate2d", x, k, dest, shape, cpu::correlate2d_acc)
}

pub fn correlate2d(x: &Tensor, k: &Tensor) -> Result<Tensor> {
    let mut dest = Tensor::zeros(&valid_shape("correlate2d", x, k)?)?;
    correlate2d_into(x, k, &mut dest)?;
    Ok(dest)
}

/// `dest += conv(x, k)` in "valid" mode (kernel rotated 180°).
pub fn convolve2d_into(x: &Tensor, k: &Tensor, dest: &mut Tensor) -> Result<()> {
    let shape = valid_shape("convolve2d", x, k)?;
    windowed_into("convolve2d", x, k, dest, shape, cpu::convolve2d_acc)
}

pub fn convolve2d(x: &Tensor, k: &Tensor) -> Result<Tensor> {
    let mut dest = Tensor::zeros(&valid_shape("convolve2d", x, k)?)?;
    convolve2d_into(x, k, &mut dest)?;
    Ok(dest)
}

/// `dest += full_conv(x, k)`; `dest` is `(H+kh-1, W+kw-1)`.
pub fn convolve2d_full_into(x: &Tensor, k: &Tensor, dest: &mut Tensor) -> Result<()> {
    let shape = full_shape("convolve2d_full", x, k)?;
    windowed_into("convolve2d_full", x, k, dest, shape, cpu::convolve2d_full_acc)
}

pub fn convolve2d_full(x: &Tensor, k: &Tensor) -> Result<Tensor> {
    let mut dest = Tensor::zeros(&full_shape("convolve2d_full", x, k)?)?;
    convolve2d_full_into(x, k, &mut dest)?;
    Ok(dest)
}

/// A copy of a 2D kernel rotated by 180°.
pub fn rotate180(k: &Tensor) -> Result<Tensor> {
    plane_dims("rotate180", k)?;
    let mut values = k.to_vec();
    values.reverse();
    Ok(Tensor::from_vec(k.shape(), values)?.with_name(k.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn matmul_row_vector() {
        let a = tensor!([1.0, 2.0]);
        let b = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let c = mat_mul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[3]);
        assert_eq!(c.to_vec(), vec![9.0, 12.0, 15.0]);
    }

    #[test]
    fn matmul_rejects_bad_shapes() {
        let a = tensor!([[1.0, 2.0]]);
        let b = tensor!([[1.0, 2.0]]);
        assert!(matches!(mat_mul(&a, &b), Err(Error::ShapeMismatch { .. })));

        let cube = Tensor::zeros(&[2, 2, 2]).unwrap();
        assert!(mat_mul(&cube, &b).is_err());

        let mut wrong = Tensor::zeros(&[2, 2]).unwrap();
        let sq = tensor!([[1.0, 0.0], [0.0, 1.0]]);
        assert!(mat_mul_into(&a, &sq, &mut wrong).is_err());
    }

    #[test]
    fn matmul_into_accumulates() {
        let a = tensor!([[1.0, 0.0], [0.0, 1.0]]);
        let b = tensor!([[2.0, 3.0], [4.0, 5.0]]);
        let mut d = Tensor::filled(&[2, 2], 1.0).unwrap();
        mat_mul_into(&a, &b, &mut d).unwrap();
        assert_eq!(d.to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn correlation_destination_checked() {
        let x = Tensor::zeros(&[4, 4]).unwrap();
        let k = Tensor::zeros(&[3, 3]).unwrap();
        let mut bad = Tensor::zeros(&[3, 3]).unwrap();
        assert!(matches!(correlate2d_into(&x, &k, &mut bad), Err(Error::ShapeMismatch { .. })));
        assert_eq!(correlate2d(&x, &k).unwrap().shape(), &[2, 2]);
        assert!(correlate2d(&k, &x).is_err());
        assert_eq!(convolve2d_full(&x, &k).unwrap().shape(), &[6, 6]);
    }

    #[test]
    fn correlation_into_strided_view() {
        let x = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let k = tensor!([[1.0]]);
        let big = Tensor::zeros(&[3, 3]).unwrap();
        let mut window = big.slice(&[1, 1], &[3, 3]).unwrap();
        correlate2d_into(&x, &k, &mut window).unwrap();
        assert_eq!(big.get(&[2, 2]).unwrap(), 4.0);
        assert_eq!(big.get(&[0, 0]).unwrap(), 0.0);
    }
}
