//! Layer-level forward and backward routines.
//!
//! # Manual Backpropagation Primitives
//!
//! Each layer type has a hand-derived pair of routines here. They are the
//! composite half of the operator engine: shape checks, batching, and the
//! multi-channel loops that call into [`crate::ops`].
//!
//! **Key Routines:**
//! - **Dense:** `out = x · W (+ b)`; backward yields `x̄ = ḡ · Wᵀ`, `W̄ += xᵀ · ḡ`, `b̄ += Σ_batch ḡ`.
//! - **Conv2D:** multi-channel valid correlation plus per-filter bias; backward
//!   uses full convolution for the input gradient and correlation for the kernel.
//! - **Pooling:** max (first maximum wins) and average (actual window size).
//!
//! ## Accumulation Contract
//!
//! Forward routines **overwrite** their output. Backward routines **accumulate**
//! into every gradient destination, including the input gradient; layers zero
//! the input gradient themselves and leave parameter gradients to
//! `zero_gradients`.
//!
//! ## Concurrency
//!
//! [`conv2d_backward`] computes the input, kernel and bias gradients as three
//! independent tasks with `rayon::join` and returns only after all three have
//! finished. When a destination shares storage with another destination or
//! with an operand, the tasks run one after another instead.

use rayon::prelude::*;

use crate::backend;
use crate::error::{Error, Result};
use crate::ops::cpu::{self, ConvGeometry, PoolGeometry};
use crate::ops::dispatch::mat_mul_into;
use crate::tensors::Tensor;

/// Overwrites `out` with `input · kernel (+ bias)`.
///
/// - `input`: `(in)` or batched `(N, in)`
/// - `kernel`: `(in, units)`
/// - `bias`: `(units)`, broadcast over the batch rows
/// - `out`: `(units)` or `(N, units)`
pub fn dense_forward(input: &Tensor, kernel: &Tensor, bias: Option<&Tensor>, out: &mut Tensor) -> Result<()> {
    out.zero();
    mat_mul_into(input, kernel, out)?;
    if let Some(b) = bias {
        if out.rank() == 1 {
            out.add(b)?;
        } else {
            for r in 0..out.shape()[0] {
                out.sub_tensor(r)?.add(b)?;
            }
        }
    }
    Ok(())
}

/// Accumulates Dense gradients.
///
/// - `grad_input += grad_out · kernelᵀ`
/// - `grad_kernel += inputᵀ · grad_out` (a single sample is treated as one row)
/// - `grad_bias += grad_out`, summed over the batch rows
pub fn dense_backward(
    input: &Tensor,
    kernel: &Tensor,
    grad_out: &Tensor,
    grad_kernel: &mut Tensor,
    grad_bias: Option<&mut Tensor>,
    grad_input: &mut Tensor,
) -> Result<()> {
    mat_mul_into(grad_out, &kernel.transpose(), grad_input)?;

    if input.rank() == 1 {
        mat_mul_into(&input.unsqueeze(0)?.transpose(), grad_out, grad_kernel)?;
        if let Some(gb) = grad_bias {
            gb.add(grad_out)?;
        }
    } else {
        mat_mul_into(&input.transpose(), grad_out, grad_kernel)?;
        if let Some(gb) = grad_bias {
            for r in 0..grad_out.shape()[0] {
                gb.add(&grad_out.sub_tensor(r)?)?;
            }
        }
    }
    Ok(())
}

/// Splits `(N, ...)` from `(...)` given the unbatched rank.
fn split_batch<'a>(op: &'static str, shape: &'a [usize], rank: usize) -> Result<(usize, &'a [usize])> {
    match shape.len() {
        r if r == rank => Ok((1, shape)),
        r if r == rank + 1 => Ok((shape[0], &shape[1..])),
        _ => Err(Error::mismatch(op, &vec![0; rank], shape)),
    }
}

fn expect_shape(op: &'static str, t: &Tensor, expected: &[usize]) -> Result<()> {
    if t.shape() != expected {
        return Err(Error::mismatch(op, expected, t.shape()));
    }
    Ok(())
}

/// Output shape of a valid Conv2D over `(C, H, W)` with `filters` kernels of `kh×kw`.
///
/// # Errors
/// [`Error::InvalidShape`] if the input is not rank 3 or the kernel is larger
/// than the input.
pub fn conv2d_output_shape(input_shape: &[usize], filters: usize, kernel: [usize; 2]) -> Result<Vec<usize>> {
    let [_, h, w] = input_shape else {
        return Err(Error::invalid_shape(input_shape, "conv2d input must be (channels, height, width)"));
    };
    match (cpu::valid_dim(*h, kernel[0]), cpu::valid_dim(*w, kernel[1])) {
        (Some(oh), Some(ow)) if filters > 0 => Ok(vec![filters, oh, ow]),
        _ => Err(Error::invalid_shape(
            input_shape,
            format!("kernel {kernel:?} with {filters} filters does not fit"),
        )),
    }
}

fn conv_geometry(op: &'static str, sample: &[usize], kernel: &Tensor) -> Result<ConvGeometry> {
    let (&[channels, height, width], &[filters, kc, kernel_h, kernel_w]) = (sample, kernel.shape()) else {
        return Err(Error::mismatch(op, &[0, 0, 0, 0], kernel.shape()));
    };
    if kc != channels {
        return Err(Error::mismatch(op, &[filters, channels, kernel_h, kernel_w], kernel.shape()));
    }
    conv2d_output_shape(sample, filters, [kernel_h, kernel_w])?;
    Ok(ConvGeometry { channels, filters, height, width, kernel_h, kernel_w })
}

fn batched(n: usize, batched: bool, sample: &[usize]) -> Vec<usize> {
    let mut shape = Vec::with_capacity(sample.len() + 1);
    if batched {
        shape.push(n);
    }
    shape.extend_from_slice(sample);
    shape
}

/// Overwrites `out` with the multi-channel correlation of `input` and `kernel`
/// plus the per-filter bias.
///
/// - `input`: `(C, H, W)` or `(N, C, H, W)`
/// - `kernel`: `(F, C, kh, kw)`
/// - `bias`: `(F)`
/// - `out`: `(F, H-kh+1, W-kw+1)`, with the same leading `N` when batched
///
/// Filters (and samples) are computed in parallel under [`Backend::Rayon`](crate::backend::Backend::Rayon);
/// each output plane has exactly one writer.
pub fn conv2d_forward(input: &Tensor, kernel: &Tensor, bias: Option<&Tensor>, out: &mut Tensor) -> Result<()> {
    let (n, sample) = split_batch("conv2d_forward", input.shape(), 3)?;
    let g = conv_geometry("conv2d_forward", sample, kernel)?;
    let is_batched = input.rank() == 4;
    expect_shape("conv2d_forward", out, &batched(n, is_batched, &[g.filters, g.out_h(), g.out_w()]))?;
    if let Some(b) = bias {
        expect_shape("conv2d_forward", b, &[g.filters])?;
    }

    let xv = input.to_vec();
    let kv = kernel.to_vec();
    let bv = bias.map(Tensor::to_vec);
    let parallel = backend::parallel();
    tracing::trace!(samples = n, filters = g.filters, channels = g.channels, parallel, "conv2d_forward");

    let mut values = vec![0.0; n * g.output_len()];
    let sample_fn = |(s, o): (usize, &mut [f64])| {
        let x = &xv[s * g.input_len()..(s + 1) * g.input_len()];
        cpu::conv2d_forward_acc(x, &kv, bv.as_deref(), &g, o, parallel);
    };
    if parallel && n > 1 {
        values.par_chunks_mut(g.output_len()).enumerate().for_each(sample_fn);
    } else {
        values.chunks_mut(g.output_len()).enumerate().for_each(sample_fn);
    }
    out.write_values(&values);
    Ok(())
}

/// Accumulates the three Conv2D gradients.
///
/// 1. `grad_input[c] += Σ_f full_conv(grad_out[f], kernel[f][c])`
/// 2. `grad_kernel[f][c] += corr(input[c], grad_out[f])`
/// 3. `grad_bias[f] += Σ grad_out[f]`
///
/// Batched inputs sum kernel and bias gradients over samples in order. The
/// three results are independent and run concurrently when the backend allows
/// it and their destinations are disjoint; the call returns after all finish.
pub fn conv2d_backward(
    input: &Tensor,
    kernel: &Tensor,
    grad_out: &Tensor,
    grad_kernel: &mut Tensor,
    grad_bias: Option<&mut Tensor>,
    grad_input: &mut Tensor,
) -> Result<()> {
    let (n, sample) = split_batch("conv2d_backward", input.shape(), 3)?;
    let g = conv_geometry("conv2d_backward", sample, kernel)?;
    let is_batched = input.rank() == 4;
    expect_shape("conv2d_backward", grad_out, &batched(n, is_batched, &[g.filters, g.out_h(), g.out_w()]))?;
    expect_shape("conv2d_backward", grad_kernel, kernel.shape())?;
    expect_shape("conv2d_backward", grad_input, input.shape())?;
    if let Some(gb) = grad_bias.as_deref() {
        expect_shape("conv2d_backward", gb, &[g.filters])?;
    }

    let xv = input.to_vec();
    let kv = kernel.to_vec();
    let gv = grad_out.to_vec();
    let (il, ol) = (g.input_len(), g.output_len());

    let input_task = |dst: &mut Tensor| {
        let mut buf = dst.to_vec();
        for s in 0..n {
            cpu::conv2d_input_grad_acc(&gv[s * ol..(s + 1) * ol], &kv, &g, &mut buf[s * il..(s + 1) * il]);
        }
        dst.write_values(&buf);
    };
    let kernel_task = |dst: &mut Tensor| {
        let mut buf = dst.to_vec();
        for s in 0..n {
            cpu::conv2d_kernel_grad_acc(&xv[s * il..(s + 1) * il], &gv[s * ol..(s + 1) * ol], &g, &mut buf);
        }
        dst.write_values(&buf);
    };
    let bias_task = |dst: &mut Tensor| {
        let mut buf = dst.to_vec();
        for s in 0..n {
            cpu::conv2d_bias_grad_acc(&gv[s * ol..(s + 1) * ol], &g, &mut buf);
        }
        dst.write_values(&buf);
    };

    let disjoint = {
        let mut dests: Vec<&Tensor> = vec![&*grad_input, &*grad_kernel];
        dests.extend(grad_bias.as_deref());
        let sources = [input, kernel, grad_out];
        dests.iter().enumerate().all(|(i, d)| {
            dests[i + 1..].iter().all(|o| !d.shares_storage(o)) && sources.iter().all(|s| !d.shares_storage(s))
        })
    };

    if backend::parallel() && disjoint {
        rayon::join(
            || input_task(grad_input),
            || {
                rayon::join(
                    || kernel_task(grad_kernel),
                    || {
                        if let Some(gb) = grad_bias {
                            bias_task(gb);
                        }
                    },
                )
            },
        );
    } else {
        if !disjoint {
            tracing::debug!("conv2d_backward operands share storage, running tasks sequentially");
        }
        input_task(grad_input);
        kernel_task(grad_kernel);
        if let Some(gb) = grad_bias {
            bias_task(gb);
        }
    }
    Ok(())
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Maximum of the window; ties go to the first cell in row-major order.
    Max,
    /// Mean over the cells actually inside the window.
    Avg,
}

/// Output shape of pooling a `(C, H, W)` input.
///
/// Windows start every `stride` cells; a trailing window cut by the border is
/// kept and covers fewer cells.
///
/// # Errors
/// [`Error::InvalidShape`] if the input is not rank 3, or the filter is larger
/// than the input along some axis.
pub fn pool2d_output_shape(input_shape: &[usize], filter: [usize; 2], stride: [usize; 2]) -> Result<Vec<usize>> {
    let [c, h, w] = input_shape else {
        return Err(Error::invalid_shape(input_shape, "pooling input must be (channels, height, width)"));
    };
    match (cpu::pool_dim(*h, filter[0], stride[0]), cpu::pool_dim(*w, filter[1], stride[1])) {
        (Some(oh), Some(ow)) => Ok(vec![*c, oh, ow]),
        _ => Err(Error::invalid_shape(
            input_shape,
            format!("pool filter {filter:?} with stride {stride:?} does not fit"),
        )),
    }
}

fn pool_geometry(op: &'static str, input: &Tensor, filter: [usize; 2], stride: [usize; 2]) -> Result<(usize, PoolGeometry, Vec<usize>)> {
    let (n, sample) = split_batch(op, input.shape(), 3)?;
    let out_sample = pool2d_output_shape(sample, filter, stride)?;
    let g = PoolGeometry { height: sample[1], width: sample[2], filter, stride };
    Ok((n * sample[0], g, batched(n, input.rank() == 4, &out_sample)))
}

/// Overwrites `out` with the pooled planes of `input` (`(C, H, W)` or `(N, C, H, W)`).
pub fn pool2d_forward(kind: PoolKind, input: &Tensor, filter: [usize; 2], stride: [usize; 2], out: &mut Tensor) -> Result<()> {
    let (planes, g, out_shape) = pool_geometry("pool2d_forward", input, filter, stride)?;
    expect_shape("pool2d_forward", out, &out_shape)?;

    let xv = input.to_vec();
    let (plane, out_plane) = (g.height * g.width, g.out_h() * g.out_w());
    let mut values = vec![0.0; planes * out_plane];
    let plane_fn = |(p, o): (usize, &mut [f64])| {
        let x = &xv[p * plane..(p + 1) * plane];
        match kind {
            PoolKind::Max => cpu::max_pool2d(x, &g, o),
            PoolKind::Avg => cpu::avg_pool2d(x, &g, o),
        }
    };
    if backend::parallel() && planes > 1 {
        values.par_chunks_mut(out_plane).enumerate().for_each(plane_fn);
    } else {
        values.chunks_mut(out_plane).enumerate().for_each(plane_fn);
    }
    out.write_values(&values);
    Ok(())
}

/// Accumulates the pooling input gradient into `grad_input`.
///
/// Max pooling re-derives each window's winner from `input`, so `input` must
/// be the tensor the forward pass saw.
pub fn pool2d_backward(
    kind: PoolKind,
    input: &Tensor,
    grad_out: &Tensor,
    filter: [usize; 2],
    stride: [usize; 2],
    grad_input: &mut Tensor,
) -> Result<()> {
    let (planes, g, out_shape) = pool_geometry("pool2d_backward", input, filter, stride)?;
    expect_shape("pool2d_backward", grad_out, &out_shape)?;
    expect_shape("pool2d_backward", grad_input, input.shape())?;

    let xv = input.to_vec();
    let gv = grad_out.to_vec();
    let (plane, out_plane) = (g.height * g.width, g.out_h() * g.out_w());
    let mut buf = grad_input.to_vec();
    let plane_fn = |(p, dst): (usize, &mut [f64])| {
        let go = &gv[p * out_plane..(p + 1) * out_plane];
        match kind {
            PoolKind::Max => cpu::max_pool2d_backward_acc(&xv[p * plane..(p + 1) * plane], go, &g, dst),
            PoolKind::Avg => cpu::avg_pool2d_backward_acc(go, &g, dst),
        }
    };
    if backend::parallel() && planes > 1 {
        buf.par_chunks_mut(plane).enumerate().for_each(plane_fn);
    } else {
        buf.chunks_mut(plane).enumerate().for_each(plane_fn);
    }
    grad_input.write_values(&buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn dense_bias_broadcasts_over_rows() {
        let x = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let w = tensor!([[1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]);
        let b = tensor!([0.5, -0.5, 0.0]);
        let mut out = Tensor::filled(&[2, 3], 99.0).unwrap();
        dense_forward(&x, &w, Some(&b), &mut out).unwrap();
        assert_eq!(out.to_vec(), vec![1.5, 1.5, 3.0, 3.5, 3.5, 7.0]);
    }

    #[test]
    fn dense_single_sample_gradients() {
        let x = tensor!([1.0, 2.0]);
        let w = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let g = tensor!([1.0, -1.0]);
        let mut gw = Tensor::zeros(&[2, 2]).unwrap();
        let mut gb = Tensor::zeros(&[2]).unwrap();
        let mut gx = Tensor::zeros(&[2]).unwrap();
        dense_backward(&x, &w, &g, &mut gw, Some(&mut gb), &mut gx).unwrap();
        assert_eq!(gw.to_vec(), vec![1.0, -1.0, 2.0, -2.0]);
        assert_eq!(gb.to_vec(), vec![1.0, -1.0]);
        assert_eq!(gx.to_vec(), vec![-1.0, -1.0]);
    }

    #[test]
    fn dense_batch_bias_gradient_sums_rows() {
        let x = tensor!([[1.0], [2.0]]);
        let w = tensor!([[1.0]]);
        let g = tensor!([[0.5], [0.25]]);
        let mut gw = Tensor::zeros(&[1, 1]).unwrap();
        let mut gb = Tensor::zeros(&[1]).unwrap();
        let mut gx = Tensor::zeros(&[2, 1]).unwrap();
        dense_backward(&x, &w, &g, &mut gw, Some(&mut gb), &mut gx).unwrap();
        assert_eq!(gb.to_vec(), vec![0.75]);
        assert_eq!(gw.to_vec(), vec![1.0]);
    }

    #[test]
    fn conv_shapes_follow_valid_formula() {
        assert_eq!(conv2d_output_shape(&[1, 5, 5], 1, [3, 3]).unwrap(), vec![1, 3, 3]);
        assert_eq!(conv2d_output_shape(&[1, 3, 3], 1, [3, 3]).unwrap(), vec![1, 1, 1]);
        assert!(matches!(conv2d_output_shape(&[1, 2, 2], 1, [3, 3]), Err(Error::InvalidShape { .. })));
        assert!(conv2d_output_shape(&[5, 5], 1, [3, 3]).is_err());
    }

    #[test]
    fn conv_forward_adds_bias_per_filter() {
        let x = Tensor::filled(&[2, 3, 3], 1.0).unwrap();
        let k = Tensor::filled(&[2, 2, 2, 2], 1.0).unwrap();
        let b = tensor!([0.0, 10.0]);
        let mut out = Tensor::zeros(&[2, 2, 2]).unwrap();
        conv2d_forward(&x, &k, Some(&b), &mut out).unwrap();
        assert_eq!(out.sub_tensor(0).unwrap().to_vec(), vec![8.0; 4]);
        assert_eq!(out.sub_tensor(1).unwrap().to_vec(), vec![18.0; 4]);
    }

    #[test]
    fn conv_backward_rejects_wrong_gradient_shape() {
        let x = Tensor::zeros(&[1, 3, 3]).unwrap();
        let k = Tensor::zeros(&[1, 1, 2, 2]).unwrap();
        let g = Tensor::zeros(&[1, 3, 3]).unwrap();
        let mut gk = Tensor::zeros(&[1, 1, 2, 2]).unwrap();
        let mut gx = Tensor::zeros(&[1, 3, 3]).unwrap();
        let err = conv2d_backward(&x, &k, &g, &mut gk, None, &mut gx).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn avg_pool_uses_actual_window_counts() {
        let x = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
        let mut out = Tensor::zeros(&[1, 2, 2]).unwrap();
        pool2d_forward(PoolKind::Avg, &x, [2, 2], [2, 2], &mut out).unwrap();
        assert_eq!(out.to_vec(), vec![3.0, 4.5, 7.5, 9.0]);
    }
}
