//! Element-wise arithmetic, mapping and reductions.
//!
//! Binary operations read the right-hand side into a snapshot before writing,
//! so `t.add(&t.view())` doubles `t` instead of observing its own writes.

use super::{ScalarCell, Tensor};
use crate::error::{Error, Result};

impl Tensor {
    fn zip_in_place(
        &mut self,
        other: &Tensor,
        op: &'static str,
        f: impl Fn(&ScalarCell, f64),
    ) -> Result<&mut Self> {
        if !self.same_shape(other) {
            return Err(Error::mismatch(op, &self.shape, &other.shape));
        }
        let rhs = other.to_vec();
        for (cell, r) in self.cells().zip(rhs) {
            f(cell, r);
        }
        Ok(self)
    }

    /// `self += other`, element-wise.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless the shapes are identical.
    pub fn add(&mut self, other: &Tensor) -> Result<&mut Self> {
        self.zip_in_place(other, "add", ScalarCell::add)
    }

    pub fn sub(&mut self, other: &Tensor) -> Result<&mut Self> {
        self.zip_in_place(other, "sub", ScalarCell::sub)
    }

    pub fn mul(&mut self, other: &Tensor) -> Result<&mut Self> {
        self.zip_in_place(other, "mul", ScalarCell::mul)
    }

    pub fn div(&mut self, other: &Tensor) -> Result<&mut Self> {
        self.zip_in_place(other, "div", ScalarCell::div)
    }

    fn zip3_in_place(
        &mut self,
        a: &Tensor,
        b: &Tensor,
        op: &'static str,
        f: impl Fn(&ScalarCell, f64, f64),
    ) -> Result<&mut Self> {
        if !a.same_shape(b) {
            return Err(Error::mismatch(op, &a.shape, &b.shape));
        }
        if !self.same_shape(a) {
            return Err(Error::mismatch(op, &self.shape, &a.shape));
        }
        let (av, bv) = (a.to_vec(), b.to_vec());
        for ((cell, x), y) in self.cells().zip(av).zip(bv) {
            f(cell, x, y);
        }
        Ok(self)
    }

    /// `self += alpha * other`.
    pub fn add_scaled(&mut self, other: &Tensor, alpha: f64) -> Result<&mut Self> {
        self.zip_in_place(other, "add_scaled", |c, r| c.add_mul(alpha, r))
    }

    /// `self += a ⊙ b`.
    pub fn add_mul(&mut self, a: &Tensor, b: &Tensor) -> Result<&mut Self> {
        self.zip3_in_place(a, b, "add_mul", ScalarCell::add_mul)
    }

    /// `self += alpha * (a ⊙ b)`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless all three shapes are identical.
    pub fn add_cmul(&mut self, a: &Tensor, b: &Tensor, alpha: f64) -> Result<&mut Self> {
        self.zip3_in_place(a, b, "add_cmul", |c, x, y| c.add(alpha * (x * y)))
    }

    /// `self += alpha * (a / b)`. Division by zero follows IEEE rules.
    pub fn add_cdiv(&mut self, a: &Tensor, b: &Tensor, alpha: f64) -> Result<&mut Self> {
        self.zip3_in_place(a, b, "add_cdiv", |c, x, y| c.add(alpha * (x / y)))
    }

    /// Limits every element to `[min, max]` in place. NaN stays NaN.
    pub fn clamp(&mut self, min: f64, max: f64) -> &mut Self {
        self.apply(|x| {
            if x < min {
                min
            } else if x > max {
                max
            } else {
                x
            }
        })
    }

    pub fn add_scalar(&mut self, value: f64) -> &mut Self {
        for cell in self.cells() {
            cell.add(value);
        }
        self
    }

    pub fn mul_scalar(&mut self, value: f64) -> &mut Self {
        for cell in self.cells() {
            cell.mul(value);
        }
        self
    }

    /// New tensor with `f` applied to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        let mut out = self.clone();
        out.apply(f);
        out
    }

    /// New tensor with `f(self[i], other[i])`.
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        let mut out = self.clone();
        out.zip_in_place(other, "zip_map", |c, r| c.set(f(c.get(), r)))?;
        Ok(out)
    }

    /// Applies `f` to every element in place.
    pub fn apply(&mut self, mut f: impl FnMut(f64) -> f64) -> &mut Self {
        for cell in self.cells() {
            cell.set(f(cell.get()));
        }
        self
    }

    /// `self[i] = f(src[i])`.
    pub fn apply_from(&mut self, src: &Tensor, f: impl Fn(f64) -> f64) -> Result<&mut Self> {
        self.zip_in_place(src, "apply_from", |c, s| c.set(f(s)))
    }

    /// `self[i] = f(a[i], b[i])`.
    pub fn apply_zip(
        &mut self,
        a: &Tensor,
        b: &Tensor,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<&mut Self> {
        self.zip3_in_place(a, b, "apply_zip", |c, x, y| c.set(f(x, y)))
    }

    /// Sum of all elements in row-major order, as a `[1]` tensor.
    pub fn sum(&self) -> Tensor {
        Tensor::scalar(self.iter().sum())
    }

    pub fn mean(&self) -> Tensor {
        Tensor::scalar(self.iter().sum::<f64>() / self.len() as f64)
    }

    pub fn max(&self) -> Tensor {
        Tensor::scalar(self.iter().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn min(&self) -> Tensor {
        Tensor::scalar(self.iter().fold(f64::INFINITY, f64::min))
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> Tensor {
        let n = self.len() as f64;
        let mean = self.iter().sum::<f64>() / n;
        let var = self.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
        Tensor::scalar(var.sqrt())
    }

    /// Sums along `axis`, dropping it from the shape (rank-1 input gives `[1]`).
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        let len = self.dim(axis)?;
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();

        let data = self.to_vec();
        let mut out = vec![0.0; outer * inner];
        for o in 0..outer {
            for a in 0..len {
                let base = (o * len + a) * inner;
                for i in 0..inner {
                    out[o * inner + i] += data[base + i];
                }
            }
        }

        let mut shape = self.shape.clone();
        shape.remove(axis);
        if shape.is_empty() {
            shape.push(1);
        }
        Tensor::from_vec(&shape, out)
    }

    /// Row-major position of the first maximum.
    pub fn argmax(&self) -> usize {
        let mut best = (0, f64::NEG_INFINITY);
        for (i, v) in self.iter().enumerate() {
            if v > best.1 {
                best = (i, v);
            }
        }
        best.0
    }

    /// Index of the first maximum along `axis`, stored as `f64`.
    ///
    /// The axis is dropped from the shape; a rank-1 input gives `[1]`.
    ///
    /// # Errors
    /// [`Error::IndexOutOfRange`] if `axis >= rank`.
    pub fn argmax_axis(&self, axis: usize) -> Result<Tensor> {
        let len = self.dim(axis)?;
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();

        let data = self.to_vec();
        let mut out = vec![0.0; outer * inner];
        for o in 0..outer {
            for i in 0..inner {
                let mut best = (0, f64::NEG_INFINITY);
                for a in 0..len {
                    let v = data[(o * len + a) * inner + i];
                    if v > best.1 {
                        best = (a, v);
                    }
                }
                out[o * inner + i] = best.0 as f64;
            }
        }

        let mut shape = self.shape.clone();
        shape.remove(axis);
        if shape.is_empty() {
            shape.push(1);
        }
        Tensor::from_vec(&shape, out)
    }

    /// Same shape and every pair of elements within `eps`.
    pub fn approx_eq(&self, other: &Tensor, eps: f64) -> bool {
        self.same_shape(other) && self.iter().zip(other.iter()).all(|(a, b)| (a - b).abs() <= eps)
    }
}

#[cfg(test)]
mod tests {
    use crate::tensor;
    use crate::error::Error;

    #[test]
    fn arithmetic_requires_identical_shapes() {
        let mut a = tensor!([1.0, 2.0, 3.0]);
        let b = tensor!([[1.0, 2.0, 3.0]]);
        assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));

        let c = tensor!([4.0, 5.0, 6.0]);
        a.add(&c).unwrap().mul(&c).unwrap();
        assert_eq!(a.to_vec(), vec![20.0, 35.0, 54.0]);
        a.div(&c).unwrap().sub(&c).unwrap();
        assert_eq!(a.to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn self_alias_reads_snapshot() {
        let mut a = tensor!([1.0, 2.0]);
        let v = a.view();
        a.add(&v).unwrap();
        assert_eq!(a.to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn fused_and_scaled_updates() {
        let mut acc = tensor!([1.0, 1.0]);
        acc.add_mul(&tensor!([2.0, 3.0]), &tensor!([4.0, 5.0])).unwrap();
        assert_eq!(acc.to_vec(), vec![9.0, 16.0]);
        acc.add_scaled(&tensor!([1.0, 2.0]), -1.0).unwrap();
        assert_eq!(acc.to_vec(), vec![8.0, 14.0]);
    }

    #[test]
    fn reductions() {
        let t = tensor!([[1.0, -2.0], [3.0, 6.0]]);
        assert_eq!(t.sum().item().unwrap(), 8.0);
        assert_eq!(t.mean().item().unwrap(), 2.0);
        assert_eq!(t.max().item().unwrap(), 6.0);
        assert_eq!(t.min().item().unwrap(), -2.0);
        assert_eq!(tensor!([2.0, 4.0]).stddev().item().unwrap(), 1.0);
        assert_eq!(t.sum_axis(0).unwrap().to_vec(), vec![4.0, 4.0]);
        assert_eq!(t.sum_axis(1).unwrap().to_vec(), vec![-1.0, 9.0]);
        assert_eq!(tensor!([1.0, 9.0, 9.0]).argmax(), 1);
    }

    #[test]
    fn scaled_products_and_quotients() {
        let mut acc = tensor!([1.0, 1.0, 1.0]);
        let a = tensor!([2.0, 3.0, 4.0]);
        let b = tensor!([4.0, 2.0, 8.0]);
        acc.add_cmul(&a, &b, 0.5).unwrap();
        assert_eq!(acc.to_vec(), vec![5.0, 4.0, 17.0]);
        acc.add_cdiv(&a, &b, -2.0).unwrap();
        assert_eq!(acc.to_vec(), vec![4.0, 1.0, 16.0]);
        assert!(matches!(acc.add_cmul(&a, &tensor!([1.0]), 1.0), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn clamp_limits_range() {
        let mut t = tensor!([-3.0, 0.5, 7.0, f64::NAN]);
        t.clamp(-1.0, 1.0);
        assert_eq!(t.to_vec()[..3], [-1.0, 0.5, 1.0]);
        assert!(t.to_vec()[3].is_nan());
    }

    #[test]
    fn argmax_along_axis() {
        let t = tensor!([[1.0, 5.0, 5.0], [7.0, 2.0, 0.0]]);
        let rows = t.argmax_axis(1).unwrap();
        assert_eq!(rows.shape(), &[2]);
        assert_eq!(rows.to_vec(), vec![1.0, 0.0]);

        let cols = t.argmax_axis(0).unwrap();
        assert_eq!(cols.to_vec(), vec![1.0, 0.0, 0.0]);

        assert_eq!(tensor!([0.0, 3.0, 1.0]).argmax_axis(0).unwrap().to_vec(), vec![1.0]);
        assert!(matches!(t.argmax_axis(2), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn mapping_preserves_shape() {
        let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let doubled = t.map(|x| x * 2.0);
        assert_eq!(doubled.shape(), t.shape());
        assert_eq!(doubled.to_vec(), vec![2.0, 4.0, 6.0, 8.0]);

        let prod = t.zip_map(&doubled, |a, b| a * b).unwrap();
        assert_eq!(prod.to_vec(), vec![2.0, 8.0, 18.0, 32.0]);

        let mut out = t.clone();
        out.apply_from(&doubled, |x| x + 1.0).unwrap();
        assert_eq!(out.to_vec(), vec![3.0, 5.0, 7.0, 9.0]);
        out.apply_zip(&t, &doubled, |a, b| b - a).unwrap();
        assert_eq!(out, t);
    }
}
