//! Core tensor data structures and operations.
//!
//! # Core Tensor Utilities
//!
//! A [`Tensor`] is a row-major, N-dimensional array of `f64` values backed by a
//! shared arena of [`ScalarCell`]s. Views and slices reference the same arena,
//! so writes through one are visible through all of them.
//!
//! It supports:
//! - Construction from flat data, fills, and the [`tensor!`](crate::tensor) literal macro
//! - Row-major indexing with bounds checks
//! - Aliasing views: [`Tensor::view`], [`Tensor::sub_tensor`], [`Tensor::slice`], [`Tensor::transpose`]
//! - Value copies that never alias: [`Tensor::copy_from`], [`Clone`]
//! - Element-wise arithmetic, mapping and reductions
//!
//! ## Design Highlights
//! - Storage is an `Arc<[ScalarCell]>`; a tensor is a shape plus a layout into it
//! - A layout is either a contiguous window (owners, leading-axis sub-tensors)
//!   or an explicit slot map (arbitrary slices, transposes)
//! - `reshape` only swaps the shape; the layout is untouched
//! - `clone` is a deep copy into a fresh arena
//!
//! ## Limitations
//! - `f64` only
//! - No broadcasting; operands of element-wise ops must have identical shapes
//!
//! ## Example
//!
//! ```rust
//! use briny_nn::tensors::Tensor;
//!
//! let mut t = Tensor::from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! let mut row = t.sub_tensor(1).unwrap();
//! row.set(40.0, &[0]).unwrap();
//! assert_eq!(t.get(&[1, 0]).unwrap(), 40.0);
//! ```

pub mod cell;
mod macros;
mod math;
mod view;

use core::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

pub use cell::ScalarCell;
use view::{CellIter, Layout};

/// An N-dimensional tensor of `f64` values over shared scalar storage.
///
/// - `shape` lists the size of each dimension; every size is positive.
/// - The element count always equals the product of `shape`.
/// - Two tensors share storage only when one was derived from the other
///   through a view operation.
pub struct Tensor {
    cells: Arc<[ScalarCell]>,
    layout: Layout,
    shape: Vec<usize>,
    name: String,
}

/// Validates a shape and returns its element count.
pub(crate) fn checked_len(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(Error::invalid_shape(shape, "rank must be at least 1"));
    }
    if shape.contains(&0) {
        return Err(Error::invalid_shape(shape, "dimensions must be positive"));
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::invalid_shape(shape, "element count overflows usize"))
}

/// Row-major strides for `shape`.
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

impl Tensor {
    fn from_cells(shape: Vec<usize>, cells: Arc<[ScalarCell]>) -> Self {
        Self {
            cells,
            layout: Layout::Contiguous(0),
            shape,
            name: String::from("tensor"),
        }
    }

    /// Creates a tensor of zeros.
    ///
    /// # Errors
    /// [`Error::InvalidShape`] if `shape` is empty or has a zero dimension.
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        let len = checked_len(shape)?;
        let cells: Arc<[ScalarCell]> = (0..len).map(|_| ScalarCell::zero()).collect();
        Ok(Self::from_cells(shape.to_vec(), cells))
    }

    /// Creates a tensor where every element is `value`.
    pub fn filled(shape: &[usize], value: f64) -> Result<Self> {
        let len = checked_len(shape)?;
        let cells: Arc<[ScalarCell]> = (0..len).map(|_| ScalarCell::new(value)).collect();
        Ok(Self::from_cells(shape.to_vec(), cells))
    }

    /// Creates a tensor from flat row-major data.
    ///
    /// # Errors
    /// - [`Error::InvalidShape`] for an empty shape or a zero dimension.
    /// - [`Error::SizeMismatch`] if `data.len()` differs from the shape product.
    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        let len = checked_len(shape)?;
        if len != data.len() {
            return Err(Error::SizeMismatch {
                shape: shape.to_vec(),
                expected: len,
                actual: data.len(),
            });
        }
        let cells: Arc<[ScalarCell]> = data.into_iter().map(ScalarCell::new).collect();
        Ok(Self::from_cells(shape.to_vec(), cells))
    }

    /// A one-element tensor of shape `[1]`.
    pub fn scalar(value: f64) -> Self {
        Self::from_cells(vec![1], Arc::from([ScalarCell::new(value)]))
    }

    /// Builder-style rename, used for debug output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Always `false`: a tensor holds at least one element.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Size of dimension `axis`.
    pub fn dim(&self, axis: usize) -> Result<usize> {
        self.shape
            .get(axis)
            .copied()
            .ok_or_else(|| Error::IndexOutOfRange {
                index: vec![axis],
                shape: self.shape.clone(),
            })
    }

    /// Logical row-major strides of this tensor's shape.
    pub fn strides(&self) -> Vec<usize> {
        row_major_strides(&self.shape)
    }

    /// Structural shape comparison.
    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.shape == other.shape
    }

    /// Whether both tensors reference the same arena.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    /// Maps an index tuple to a row-major linear position.
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if `index.len()` differs from the rank.
    /// - [`Error::IndexOutOfRange`] if any component is outside its dimension.
    pub fn linear_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(Error::mismatch("index", &self.shape, index));
        }
        let mut linear = 0;
        for (&i, &d) in index.iter().zip(&self.shape) {
            if i >= d {
                return Err(Error::IndexOutOfRange {
                    index: index.to_vec(),
                    shape: self.shape.clone(),
                });
            }
            linear = linear * d + i;
        }
        Ok(linear)
    }

    #[inline]
    fn cell(&self, linear: usize) -> &ScalarCell {
        &self.cells[self.layout.slot(linear)]
    }

    pub(crate) fn cells(&self) -> CellIter<'_> {
        CellIter::new(&self.cells, &self.layout, self.len())
    }

    /// Reads the element at `index`.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        let i = self.linear_index(index)?;
        Ok(self.cell(i).get())
    }

    /// Writes `value` at `index`, visible through every view of the cell.
    pub fn set(&mut self, value: f64, index: &[usize]) -> Result<&mut Self> {
        let i = self.linear_index(index)?;
        self.cell(i).set(value);
        Ok(self)
    }

    /// Adds `value` to the element at `index`.
    pub fn add_at(&mut self, value: f64, index: &[usize]) -> Result<&mut Self> {
        let i = self.linear_index(index)?;
        self.cell(i).add(value);
        Ok(self)
    }

    /// Reads the element at row-major position `i`.
    pub fn get_flat(&self, i: usize) -> Result<f64> {
        if i >= self.len() {
            return Err(Error::IndexOutOfRange {
                index: vec![i],
                shape: vec![self.len()],
            });
        }
        Ok(self.cell(i).get())
    }

    /// The value of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.len() != 1 {
            return Err(Error::mismatch("item", &[1], &self.shape));
        }
        Ok(self.cell(0).get())
    }

    /// Snapshot of all values in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.cells().map(ScalarCell::get).collect()
    }

    /// Iterates over current values in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells().map(ScalarCell::get)
    }

    /// Replaces the shape without touching storage.
    ///
    /// # Errors
    /// - [`Error::InvalidShape`] for an empty shape, a zero dimension or an
    ///   element count that overflows `usize`.
    /// - [`Error::SizeMismatch`] if the element count would change.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<&mut Self> {
        let len = checked_len(shape)?;
        if len != self.len() {
            return Err(Error::SizeMismatch {
                shape: shape.to_vec(),
                expected: len,
                actual: self.len(),
            });
        }
        self.shape = shape.to_vec();
        Ok(self)
    }

    /// Copies the values of `src` into `self`. Never aliases.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless both shapes are identical.
    pub fn copy_from(&mut self, src: &Tensor) -> Result<&mut Self> {
        if !self.same_shape(src) {
            return Err(Error::mismatch("copy", &self.shape, &src.shape));
        }
        let values = src.to_vec();
        self.write_values(&values);
        Ok(self)
    }

    /// Copies values from a tensor of any shape with the same element count.
    pub fn copy_elements(&mut self, src: &Tensor) -> Result<&mut Self> {
        let values = src.to_vec();
        self.copy_from_slice(&values)
    }

    /// Copies row-major values from a slice.
    ///
    /// # Errors
    /// [`Error::SizeMismatch`] if `values.len()` differs from [`Tensor::len`].
    pub fn copy_from_slice(&mut self, values: &[f64]) -> Result<&mut Self> {
        if values.len() != self.len() {
            return Err(Error::SizeMismatch {
                shape: self.shape.clone(),
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.write_values(values);
        Ok(self)
    }

    /// Lengths must already agree.
    pub(crate) fn write_values(&mut self, values: &[f64]) {
        for (cell, &v) in self.cells().zip(values) {
            cell.set(v);
        }
    }

    pub fn fill(&mut self, value: f64) -> &mut Self {
        for cell in self.cells() {
            cell.set(value);
        }
        self
    }

    pub fn zero(&mut self) -> &mut Self {
        self.fill(0.0)
    }

    /// Fills with `1, 2, 3, ...` in row-major order, or the reverse sequence.
    pub fn fill_counter(&mut self, ascending: bool) -> &mut Self {
        let len = self.len();
        for (i, cell) in self.cells().enumerate() {
            let v = if ascending { i + 1 } else { len - i };
            cell.set(v as f64);
        }
        self
    }
}

impl Clone for Tensor {
    /// Deep copy: the clone owns a fresh arena and shares nothing.
    fn clone(&self) -> Self {
        let cells: Arc<[ScalarCell]> = self.cells().map(ScalarCell::clone).collect();
        Self {
            cells,
            layout: Layout::Contiguous(0),
            shape: self.shape.clone(),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.same_shape(other) && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("data", &self.to_vec())
            .finish()
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, shape: &[usize], data: &[f64]) -> fmt::Result {
    match shape {
        [] => Ok(()),
        [_] => {
            write!(f, "[")?;
            for (i, v) in data.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v}")?;
            }
            write!(f, "]")
        }
        [rows, inner @ ..] => {
            let block = inner.iter().product::<usize>();
            write!(f, "[")?;
            for r in 0..*rows {
                if r > 0 {
                    write!(f, ", ")?;
                }
                write_nested(f, inner, &data[r * block..(r + 1) * block])?;
            }
            write!(f, "]")
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} = ", self.name, self.shape)?;
        write_nested(f, &self.shape, &self.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_validates_shape() {
        assert!(matches!(Tensor::zeros(&[]), Err(Error::InvalidShape { .. })));
        assert!(matches!(Tensor::zeros(&[2, 0]), Err(Error::InvalidShape { .. })));
        assert!(matches!(
            Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0]),
            Err(Error::SizeMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        assert!(matches!(Tensor::zeros(&[usize::MAX, 2]), Err(Error::InvalidShape { .. })));
        let mut t = Tensor::zeros(&[4]).unwrap();
        assert!(matches!(t.reshape(&[usize::MAX, 2]), Err(Error::InvalidShape { .. })));
        assert_eq!(t.shape(), &[4]);
    }

    #[test]
    fn row_major_indexing() {
        let t = Tensor::from_vec(&[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(t.strides(), vec![3, 1]);
        assert_eq!(t.linear_index(&[1, 2]).unwrap(), 5);
        assert_eq!(t.get(&[1, 0]).unwrap(), 3.0);
        assert!(matches!(t.get(&[2, 0]), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(t.get(&[1]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn reshape_keeps_values() {
        let mut t = Tensor::zeros(&[2, 3]).unwrap();
        t.fill_counter(true);
        t.reshape(&[3, 2]).unwrap();
        assert_eq!(t.get(&[2, 1]).unwrap(), 6.0);
        assert!(matches!(t.reshape(&[4, 2]), Err(Error::SizeMismatch { .. })));
        assert_eq!(t.shape(), &[3, 2]);
    }

    #[test]
    fn clone_is_deep() {
        let a = Tensor::filled(&[2], 1.0).unwrap();
        let mut b = a.clone();
        b.set(5.0, &[0]).unwrap();
        assert_eq!(a.get(&[0]).unwrap(), 1.0);
        assert!(!a.shares_storage(&b));
    }

    #[test]
    fn display_nests_rows() {
        let t = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_name("w");
        assert_eq!(t.to_string(), "w [2, 2] = [[1, 2], [3, 4]]");
    }

    #[test]
    fn counter_fill_descending() {
        let mut t = Tensor::zeros(&[3]).unwrap();
        t.fill_counter(false);
        assert_eq!(t.to_vec(), vec![3.0, 2.0, 1.0]);
        assert_eq!(t.item().is_err(), true);
        assert_eq!(Tensor::scalar(7.5).item().unwrap(), 7.5);
    }
}
