//! Slice-level CPU kernels.
//!
//! # CPU Kernels
//!
//! These functions work on flat row-major `f64` slices and never allocate
//! tensors. Shape validation happens one level up, in [`super::dispatch`] and
//! [`crate::backprop`]; here the dimensions are trusted.
//!
//! ## Implemented Ops
//!
//! - `matmul_acc`: `C += A × B` in i-k-j order
//! - `correlate2d_acc`, `convolve2d_acc`, `convolve2d_full_acc`: 2D sliding windows
//! - `conv2d_*`: multi-channel, multi-filter forward and gradient kernels
//! - `max_pool2d*`, `avg_pool2d*`: windowed pooling and its adjoint
//!
//! ## Accumulation
//!
//! Every `_acc` kernel adds into its destination. For windowed kernels the
//! window sum is formed first, in row-major order, and then added to the
//! destination cell once. Callers zero destinations when they want a fresh
//! result.
//!
//! ## Parallelism
//!
//! Kernels taking a `parallel` flag split the destination into disjoint chunks
//! with `rayon`. Each chunk is computed exactly as the sequential loop would,
//! so results are identical either way.

use rayon::prelude::*;

/// `dest[m×n] += a[m×k] · b[k×n]`.
pub fn matmul_acc(a: &[f64], b: &[f64], dest: &mut [f64], m: usize, k: usize, n: usize, parallel: bool) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(dest.len(), m * n);

    let row = |(i, out): (usize, &mut [f64])| {
        for l in 0..k {
            let av = a[i * k + l];
            let b_row = &b[l * n..(l + 1) * n];
            for (o, &bv) in out.iter_mut().zip(b_row) {
                *o += av * bv;
            }
        }
    };

    if parallel && m > 1 {
        dest.par_chunks_mut(n).enumerate().for_each(row);
    } else {
        dest.chunks_mut(n).enumerate().for_each(row);
    }
}

/// Output size of a "valid" window along one axis.
#[inline]
pub fn valid_dim(input: usize, kernel: usize) -> Option<usize> {
    (input >= kernel && kernel > 0).then(|| input - kernel + 1)
}

/// Output size of a "full" window along one axis.
#[inline]
pub fn full_dim(input: usize, kernel: usize) -> usize {
    input + kernel - 1
}

/// `out += corr(x, k)`, "valid" mode, no kernel flip.
///
/// `x` is `h×w`, `k` is `kh×kw`, `out` is `(h-kh+1)×(w-kw+1)`.
pub fn correlate2d_acc(x: &[f64], (h, w): (usize, usize), k: &[f64], (kh, kw): (usize, usize), out: &mut [f64]) {
    let (oh, ow) = (h - kh + 1, w - kw + 1);
    debug_assert_eq!(out.len(), oh * ow);
    for i in 0..oh {
        for j in 0..ow {
            let mut sum = 0.0;
            for l in 0..kh {
                let x_row = &x[(i + l) * w + j..(i + l) * w + j + kw];
                let k_row = &k[l * kw..(l + 1) * kw];
                for (xv, kv) in x_row.iter().zip(k_row) {
                    sum += xv * kv;
                }
            }
            out[i * ow + j] += sum;
        }
    }
}

/// `out += conv(x, k)`, "valid" mode with the kernel rotated 180°.
pub fn convolve2d_acc(x: &[f64], (h, w): (usize, usize), k: &[f64], (kh, kw): (usize, usize), out: &mut [f64]) {
    let (oh, ow) = (h - kh + 1, w - kw + 1);
    debug_assert_eq!(out.len(), oh * ow);
    for i in 0..oh {
        for j in 0..ow {
            let mut sum = 0.0;
            for l in 0..kh {
                for m in 0..kw {
                    sum += x[(i + l) * w + j + m] * k[(kh - 1 - l) * kw + (kw - 1 - m)];
                }
            }
            out[i * ow + j] += sum;
        }
    }
}

/// `out += full_conv(x, k)`; `out` is `(h+kh-1)×(w+kw-1)`.
///
/// This is the adjoint of [`correlate2d_acc`] with respect to `x`, used to
/// propagate gradients back through a convolution.
pub fn convolve2d_full_acc(x: &[f64], (h, w): (usize, usize), k: &[f64], (kh, kw): (usize, usize), out: &mut [f64]) {
    let (oh, ow) = (full_dim(h, kh), full_dim(w, kw));
    debug_assert_eq!(out.len(), oh * ow);
    for i in 0..oh {
        for j in 0..ow {
            let mut sum = 0.0;
            for m in 0..kh {
                let Some(row) = i.checked_sub(m).filter(|&r| r < h) else {
                    continue;
                };
                for n in 0..kw {
                    let Some(col) = j.checked_sub(n).filter(|&c| c < w) else {
                        continue;
                    };
                    sum += k[m * kw + n] * x[row * w + col];
                }
            }
            out[i * ow + j] += sum;
        }
    }
}

/// Geometry of a multi-channel 2D convolution over one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub channels: usize,
    pub filters: usize,
    pub height: usize,
    pub width: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
}

impl ConvGeometry {
    pub fn out_h(&self) -> usize {
        self.height - self.kernel_h + 1
    }

    pub fn out_w(&self) -> usize {
        self.width - self.kernel_w + 1
    }

    fn plane(&self) -> usize {
        self.height * self.width
    }

    fn out_plane(&self) -> usize {
        self.out_h() * self.out_w()
    }

    fn kernel_plane(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    pub fn input_len(&self) -> usize {
        self.channels * self.plane()
    }

    pub fn output_len(&self) -> usize {
        self.filters * self.out_plane()
    }

    pub fn kernel_len(&self) -> usize {
        self.filters * self.channels * self.kernel_plane()
    }
}

/// `out[f] += Σ_c corr(x[c], k[f][c]) + bias[f]` for one sample.
pub fn conv2d_forward_acc(x: &[f64], k: &[f64], bias: Option<&[f64]>, g: &ConvGeometry, out: &mut [f64], parallel: bool) {
    let filter = |(f, o): (usize, &mut [f64])| {
        for c in 0..g.channels {
            let xc = &x[c * g.plane()..(c + 1) * g.plane()];
            let kfc = &k[(f * g.channels + c) * g.kernel_plane()..][..g.kernel_plane()];
            correlate2d_acc(xc, (g.height, g.width), kfc, (g.kernel_h, g.kernel_w), o);
        }
        if let Some(b) = bias {
            for v in o.iter_mut() {
                *v += b[f];
            }
        }
    };

    if parallel && g.filters > 1 {
        out.par_chunks_mut(g.out_plane()).enumerate().for_each(filter);
    } else {
        out.chunks_mut(g.out_plane()).enumerate().for_each(filter);
    }
}

/// `grad_x[c] += Σ_f full_conv(grad_out[f], k[f][c])` for one sample.
pub fn conv2d_input_grad_acc(grad_out: &[f64], k: &[f64], g: &ConvGeometry, grad_x: &mut [f64]) {
    for f in 0..g.filters {
        let gf = &grad_out[f * g.out_plane()..(f + 1) * g.out_plane()];
        for c in 0..g.channels {
            let kfc = &k[(f * g.channels + c) * g.kernel_plane()..][..g.kernel_plane()];
            let dst = &mut grad_x[c * g.plane()..(c + 1) * g.plane()];
            convolve2d_full_acc(gf, (g.out_h(), g.out_w()), kfc, (g.kernel_h, g.kernel_w), dst);
        }
    }
}

/// `grad_k[f][c] += corr(x[c], grad_out[f])` for one sample.
pub fn conv2d_kernel_grad_acc(x: &[f64], grad_out: &[f64], g: &ConvGeometry, grad_k: &mut [f64]) {
    for f in 0..g.filters {
        let gf = &grad_out[f * g.out_plane()..(f + 1) * g.out_plane()];
        for c in 0..g.channels {
            let xc = &x[c * g.plane()..(c + 1) * g.plane()];
            let dst = &mut grad_k[(f * g.channels + c) * g.kernel_plane()..][..g.kernel_plane()];
            correlate2d_acc(xc, (g.height, g.width), gf, (g.out_h(), g.out_w()), dst);
        }
    }
}

/// `grad_b[f] += Σ grad_out[f]` for one sample.
pub fn conv2d_bias_grad_acc(grad_out: &[f64], g: &ConvGeometry, grad_b: &mut [f64]) {
    for (f, gb) in grad_b.iter_mut().enumerate().take(g.filters) {
        let sum: f64 = grad_out[f * g.out_plane()..(f + 1) * g.out_plane()].iter().sum();
        *gb += sum;
    }
}

/// Pooling window geometry for one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    pub height: usize,
    pub width: usize,
    pub filter: [usize; 2],
    pub stride: [usize; 2],
}

/// Number of windows along one axis.
///
/// Windows start at multiples of `stride`; the last one may be truncated by the
/// input edge but always starts inside it. `None` when `filter > input`.
pub fn pool_dim(input: usize, filter: usize, stride: usize) -> Option<usize> {
    if filter == 0 || stride == 0 || filter > input {
        return None;
    }
    let mut out = (input - filter).div_ceil(stride) + 1;
    if (out - 1) * stride >= input {
        out -= 1;
    }
    Some(out)
}

impl PoolGeometry {
    pub fn out_h(&self) -> usize {
        pool_dim(self.height, self.filter[0], self.stride[0]).unwrap_or(0)
    }

    pub fn out_w(&self) -> usize {
        pool_dim(self.width, self.filter[1], self.stride[1]).unwrap_or(0)
    }

    /// Row range `[start, end)` of window `i`, clipped to the input.
    fn rows(&self, i: usize) -> core::ops::Range<usize> {
        let start = i * self.stride[0];
        start..(start + self.filter[0]).min(self.height)
    }

    fn cols(&self, j: usize) -> core::ops::Range<usize> {
        let start = j * self.stride[1];
        start..(start + self.filter[1]).min(self.width)
    }

    /// Row-major position of the first maximum inside window `(i, j)`.
    fn argmax(&self, x: &[f64], i: usize, j: usize) -> usize {
        let mut best = (self.rows(i).start * self.width + self.cols(j).start, f64::NEG_INFINITY);
        for r in self.rows(i) {
            for c in self.cols(j) {
                let v = x[r * self.width + c];
                if v > best.1 {
                    best = (r * self.width + c, v);
                }
            }
        }
        best.0
    }
}

/// `out[i,j] = max(window(i,j))` for one plane.
pub fn max_pool2d(x: &[f64], g: &PoolGeometry, out: &mut [f64]) {
    let ow = g.out_w();
    for i in 0..g.out_h() {
        for j in 0..ow {
            out[i * ow + j] = x[g.argmax(x, i, j)];
        }
    }
}

/// Routes each output gradient to the input cell that won the forward max.
pub fn max_pool2d_backward_acc(x: &[f64], grad_out: &[f64], g: &PoolGeometry, grad_x: &mut [f64]) {
    let ow = g.out_w();
    for i in 0..g.out_h() {
        for j in 0..ow {
            grad_x[g.argmax(x, i, j)] += grad_out[i * ow + j];
        }
    }
}

/// `out[i,j] = mean(window(i,j))`, dividing by the cells actually inside.
pub fn avg_pool2d(x: &[f64], g: &PoolGeometry, out: &mut [f64]) {
    let ow = g.out_w();
    for i in 0..g.out_h() {
        for j in 0..ow {
            let (rows, cols) = (g.rows(i), g.cols(j));
            let count = rows.len() * cols.len();
            let mut sum = 0.0;
            for r in rows {
                for c in cols.clone() {
                    sum += x[r * g.width + c];
                }
            }
            out[i * ow + j] = sum / count as f64;
        }
    }
}

/// Spreads each output gradient evenly over its window's actual cells.
pub fn avg_pool2d_backward_acc(grad_out: &[f64], g: &PoolGeometry, grad_x: &mut [f64]) {
    let ow = g.out_w();
    for i in 0..g.out_h() {
        for j in 0..ow {
            let (rows, cols) = (g.rows(i), g.cols(j));
            let share = grad_out[i * ow + j] / (rows.len() * cols.len()) as f64;
            for r in rows {
                for c in cols.clone() {
                    grad_x[r * g.width + c] += share;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_accumulates() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [1.0; 4];
        matmul_acc(&a, &b, &mut c, 2, 2, 2, false);
        assert_eq!(c, [20.0, 23.0, 44.0, 51.0]);

        let mut p = [0.0; 4];
        matmul_acc(&a, &b, &mut p, 2, 2, 2, true);
        assert_eq!(p, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn correlation_and_convolution() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let k = [1.0, 0.0, 0.0, -1.0];
        let mut out = [0.0; 4];
        correlate2d_acc(&x, (3, 3), &k, (2, 2), &mut out);
        assert_eq!(out, [-4.0; 4]);

        let mut out = [0.0; 4];
        convolve2d_acc(&x, (3, 3), &k, (2, 2), &mut out);
        assert_eq!(out, [4.0; 4]);
    }

    #[test]
    fn full_convolution_grows_output() {
        let x = [1.0, 2.0];
        let k = [1.0, 1.0];
        let mut out = [0.0; 3];
        convolve2d_full_acc(&x, (1, 2), &k, (1, 2), &mut out);
        assert_eq!(out, [1.0, 3.0, 2.0]);
    }

    #[test]
    fn pool_dims_keep_truncated_border() {
        assert_eq!(pool_dim(3, 2, 2), Some(2));
        assert_eq!(pool_dim(4, 2, 2), Some(2));
        assert_eq!(pool_dim(5, 1, 3), Some(2));
        assert_eq!(pool_dim(1, 2, 1), None);
    }

    #[test]
    fn max_pool_ties_pick_first() {
        let x = [5.0, 5.0, 5.0, 5.0];
        let g = PoolGeometry { height: 2, width: 2, filter: [2, 2], stride: [2, 2] };
        let mut grad = [0.0; 4];
        max_pool2d_backward_acc(&x, &[1.0], &g, &mut grad);
        assert_eq!(grad, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn conv_geometry_lengths() {
        let g = ConvGeometry { channels: 2, filters: 3, height: 5, width: 4, kernel_h: 3, kernel_w: 2 };
        assert_eq!((g.out_h(), g.out_w()), (3, 3));
        assert_eq!(g.input_len(), 40);
        assert_eq!(g.output_len(), 27);
        assert_eq!(g.kernel_len(), 36);
    }
}
