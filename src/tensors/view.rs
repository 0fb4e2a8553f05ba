//! Aliasing views over a tensor's arena.
//!
//! None of the operations here copy values. The returned tensor references the
//! same [`ScalarCell`]s as its source, either through a contiguous window or a
//! slot map listing one arena index per logical element.

use std::sync::Arc;

use super::{ScalarCell, Tensor};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) enum Layout {
    /// Element `i` lives at arena slot `offset + i`.
    Contiguous(usize),
    /// Element `i` lives at arena slot `map[i]`.
    Mapped(Arc<[usize]>),
}

impl Layout {
    #[inline]
    pub(crate) fn slot(&self, i: usize) -> usize {
        match self {
            Layout::Contiguous(offset) => offset + i,
            Layout::Mapped(map) => map[i],
        }
    }
}

/// Iterator over the cells of a tensor in row-major order.
pub(crate) enum CellIter<'a> {
    Contiguous(core::slice::Iter<'a, ScalarCell>),
    Mapped {
        cells: &'a [ScalarCell],
        slots: core::slice::Iter<'a, usize>,
    },
}

impl<'a> CellIter<'a> {
    pub(crate) fn new(cells: &'a [ScalarCell], layout: &'a Layout, len: usize) -> Self {
        match layout {
            Layout::Contiguous(offset) => CellIter::Contiguous(cells[*offset..*offset + len].iter()),
            Layout::Mapped(map) => CellIter::Mapped {
                cells,
                slots: map[..len].iter(),
            },
        }
    }
}

impl<'a> Iterator for CellIter<'a> {
    type Item = &'a ScalarCell;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            CellIter::Contiguous(it) => it.next(),
            CellIter::Mapped { cells, slots } => slots.next().map(|&s| &cells[s]),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            CellIter::Contiguous(it) => it.size_hint(),
            CellIter::Mapped { slots, .. } => slots.size_hint(),
        }
    }
}

impl ExactSizeIterator for CellIter<'_> {}

/// Calls `f` with every index tuple of `shape` in row-major order.
pub(crate) fn for_each_index(shape: &[usize], mut f: impl FnMut(&[usize])) {
    let mut index = vec![0; shape.len()];
    let total: usize = shape.iter().product();
    for _ in 0..total {
        f(&index);
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

impl Tensor {
    fn derived(&self, layout: Layout, shape: Vec<usize>) -> Tensor {
        Tensor {
            cells: Arc::clone(&self.cells),
            layout,
            shape,
            name: self.name.clone(),
        }
    }

    fn mapped_by(&self, shape: Vec<usize>, source_of: impl Fn(&[usize]) -> usize) -> Tensor {
        let mut map = Vec::with_capacity(shape.iter().product());
        for_each_index(&shape, |idx| map.push(self.layout.slot(source_of(idx))));
        self.derived(Layout::Mapped(map.into()), shape)
    }

    /// An alias of the whole tensor.
    pub fn view(&self) -> Tensor {
        self.derived(self.layout.clone(), self.shape.clone())
    }

    /// Whether elements occupy one contiguous window of the arena.
    pub fn is_contiguous(&self) -> bool {
        matches!(self.layout, Layout::Contiguous(_))
    }

    /// The `index`-th sub-tensor along the leading axis, aliasing the source.
    ///
    /// A `(F, C, H, W)` tensor yields `(C, H, W)` views.
    ///
    /// # Errors
    /// - [`Error::InvalidShape`] for rank-1 tensors.
    /// - [`Error::IndexOutOfRange`] if `index >= shape[0]`.
    pub fn sub_tensor(&self, index: usize) -> Result<Tensor> {
        if self.rank() < 2 {
            return Err(Error::invalid_shape(&self.shape, "sub_tensor needs rank >= 2"));
        }
        if index >= self.shape[0] {
            return Err(Error::IndexOutOfRange {
                index: vec![index],
                shape: self.shape.clone(),
            });
        }
        let inner = self.shape[1..].to_vec();
        let block: usize = inner.iter().product();
        let layout = match &self.layout {
            Layout::Contiguous(offset) => Layout::Contiguous(offset + index * block),
            Layout::Mapped(map) => Layout::Mapped(map[index * block..(index + 1) * block].into()),
        };
        Ok(self.derived(layout, inner))
    }

    /// Aliases the hyper-rectangle `[start[i], end[i])` of every dimension.
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if `start`/`end` lengths differ from the rank.
    /// - [`Error::InvalidShape`] if `start[i] >= end[i]` for some axis.
    /// - [`Error::IndexOutOfRange`] if `end[i]` exceeds the dimension.
    pub fn slice(&self, start: &[usize], end: &[usize]) -> Result<Tensor> {
        if start.len() != self.rank() {
            return Err(Error::mismatch("slice", &self.shape, start));
        }
        if end.len() != self.rank() {
            return Err(Error::mismatch("slice", &self.shape, end));
        }
        for axis in 0..self.rank() {
            if end[axis] > self.shape[axis] {
                return Err(Error::IndexOutOfRange {
                    index: end.to_vec(),
                    shape: self.shape.clone(),
                });
            }
            if start[axis] >= end[axis] {
                return Err(Error::invalid_shape(
                    &self.shape,
                    format!("empty slice on axis {axis}: {} >= {}", start[axis], end[axis]),
                ));
            }
        }

        let shape: Vec<usize> = start.iter().zip(end).map(|(s, e)| e - s).collect();

        // Restricting only the leading axis keeps a contiguous block.
        let trailing_full = (1..self.rank()).all(|a| start[a] == 0 && end[a] == self.shape[a]);
        if trailing_full {
            if let Layout::Contiguous(offset) = self.layout {
                let block: usize = self.shape[1..].iter().product();
                return Ok(self.derived(Layout::Contiguous(offset + start[0] * block), shape));
            }
        }

        let strides = self.strides();
        Ok(self.mapped_by(shape, |idx| {
            idx.iter()
                .zip(start)
                .zip(&strides)
                .map(|((i, s), st)| (i + s) * st)
                .sum()
        }))
    }

    /// Reverses the dimension order, aliasing the source cells.
    ///
    /// A rank-1 tensor of length `n` becomes an `(n, 1)` column.
    pub fn transpose(&self) -> Tensor {
        if self.rank() == 1 {
            return self.derived(self.layout.clone(), vec![self.shape[0], 1]);
        }
        let shape: Vec<usize> = self.shape.iter().rev().copied().collect();
        let strides = self.strides();
        self.mapped_by(shape, |idx| {
            idx.iter()
                .rev()
                .zip(&strides)
                .map(|(i, st)| i * st)
                .sum()
        })
    }

    /// Reorders the axes so that output axis `i` is source axis `axes[i]`,
    /// aliasing the source cells.
    ///
    /// ```
    /// use briny_nn::tensors::Tensor;
    ///
    /// let t = Tensor::zeros(&[2, 3, 1]).unwrap();
    /// assert_eq!(t.permute(&[2, 0, 1]).unwrap().shape(), &[1, 2, 3]);
    /// ```
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if `axes.len()` differs from the rank.
    /// - [`Error::IndexOutOfRange`] for an axis past the rank.
    /// - [`Error::InvalidParameter`] for a repeated axis.
    pub fn permute(&self, axes: &[usize]) -> Result<Tensor> {
        if axes.len() != self.rank() {
            return Err(Error::mismatch("permute", &self.shape, axes));
        }
        let mut seen = vec![false; self.rank()];
        for &axis in axes {
            if axis >= self.rank() {
                return Err(Error::IndexOutOfRange {
                    index: vec![axis],
                    shape: self.shape.clone(),
                });
            }
            if std::mem::replace(&mut seen[axis], true) {
                return Err(Error::InvalidParameter(format!("axis {axis} repeated in permute {axes:?}")));
            }
        }

        let shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let strides: Vec<usize> = {
            let source = self.strides();
            axes.iter().map(|&a| source[a]).collect()
        };
        Ok(self.mapped_by(shape, |idx| idx.iter().zip(&strides).map(|(i, st)| i * st).sum()))
    }

    /// A tensor whose cells sit in one contiguous window.
    ///
    /// Contiguous tensors are returned as an alias. Anything else is copied
    /// into a fresh arena, so writes to the result stop reaching the source.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            self.view()
        } else {
            self.clone()
        }
    }

    /// A rank-1 alias of every element.
    pub fn flatten(&self) -> Tensor {
        self.derived(self.layout.clone(), vec![self.len()])
    }

    /// An alias with a new dimension of size 1 inserted at `axis`.
    pub fn unsqueeze(&self, axis: usize) -> Result<Tensor> {
        if axis > self.rank() {
            return Err(Error::IndexOutOfRange {
                index: vec![axis],
                shape: self.shape.clone(),
            });
        }
        let mut shape = self.shape.clone();
        shape.insert(axis, 1);
        Ok(self.derived(self.layout.clone(), shape))
    }

    /// An alias with a different shape of the same element count.
    pub fn reshaped(&self, shape: &[usize]) -> Result<Tensor> {
        let mut out = self.view();
        out.reshape(shape)?;
        Ok(out)
    }

    /// An alias with every size-1 dimension removed (at least rank 1 remains).
    pub fn squeeze(&self) -> Tensor {
        let mut shape: Vec<usize> = self.shape.iter().copied().filter(|&d| d != 1).collect();
        if shape.is_empty() {
            shape.push(1);
        }
        self.derived(self.layout.clone(), shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(shape: &[usize]) -> Tensor {
        let mut t = Tensor::zeros(shape).unwrap();
        t.fill_counter(true);
        t
    }

    #[test]
    fn index_walk_is_row_major() {
        let mut seen = Vec::new();
        for_each_index(&[2, 2], |i| seen.push(i.to_vec()));
        assert_eq!(seen, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }

    #[test]
    fn sub_tensor_aliases() {
        let t = counter(&[2, 2, 2]);
        let mut s = t.sub_tensor(1).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![5.0, 6.0, 7.0, 8.0]);
        assert!(s.is_contiguous());
        s.set(-1.0, &[1, 1]).unwrap();
        assert_eq!(t.get(&[1, 1, 1]).unwrap(), -1.0);
        assert!(t.sub_tensor(2).is_err());
    }

    #[test]
    fn strided_slice_aliases() {
        let t = counter(&[3, 4]);
        let mut s = t.slice(&[1, 1], &[3, 3]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![6.0, 7.0, 10.0, 11.0]);
        assert!(!s.is_contiguous());
        s.set(0.0, &[1, 0]).unwrap();
        assert_eq!(t.get(&[2, 1]).unwrap(), 0.0);
    }

    #[test]
    fn leading_axis_slice_stays_contiguous() {
        let t = counter(&[4, 2]);
        let s = t.slice(&[1, 0], &[3, 2]).unwrap();
        assert!(s.is_contiguous());
        assert_eq!(s.to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn slice_bounds() {
        let t = counter(&[2, 2]);
        assert!(matches!(t.slice(&[1, 0], &[1, 2]), Err(Error::InvalidShape { .. })));
        assert!(matches!(t.slice(&[0, 0], &[3, 2]), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(t.slice(&[0], &[1]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn transpose_permutes_cells() {
        let t = counter(&[2, 3]);
        let tt = t.transpose();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert!(tt.shares_storage(&t));

        let col = counter(&[3]).transpose();
        assert_eq!(col.shape(), &[3, 1]);
    }

    #[test]
    fn transpose_of_slice_composes() {
        let t = counter(&[3, 3]);
        let s = t.slice(&[0, 1], &[2, 3]).unwrap();
        assert_eq!(s.transpose().to_vec(), vec![2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn permute_reorders_axes() {
        let t = counter(&[2, 3, 4]);
        let p = t.permute(&[2, 0, 1]).unwrap();
        assert_eq!(p.shape(), &[4, 2, 3]);
        for (i, j, k) in [(0, 0, 0), (3, 1, 2), (1, 0, 2), (2, 1, 0)] {
            assert_eq!(p.get(&[i, j, k]).unwrap(), t.get(&[j, k, i]).unwrap());
        }

        let mut p = p;
        p.set(-5.0, &[3, 1, 2]).unwrap();
        assert_eq!(t.get(&[1, 2, 3]).unwrap(), -5.0);

        let reversed = t.permute(&[2, 1, 0]).unwrap();
        assert_eq!(reversed, t.transpose());
        assert_eq!(t.permute(&[0, 1, 2]).unwrap(), t);
    }

    #[test]
    fn permute_rejects_bad_axes() {
        let t = counter(&[2, 3]);
        assert!(matches!(t.permute(&[0]), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(t.permute(&[0, 2]), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(t.permute(&[1, 1]), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn contiguous_copies_only_mapped_layouts() {
        let t = counter(&[2, 3]);
        let mut same = t.contiguous();
        assert!(same.shares_storage(&t));
        same.set(0.0, &[0, 0]).unwrap();
        assert_eq!(t.get(&[0, 0]).unwrap(), 0.0);

        let tt = t.transpose();
        let mut packed = tt.contiguous();
        assert!(packed.is_contiguous());
        assert!(!packed.shares_storage(&t));
        assert_eq!(packed, tt);
        packed.set(100.0, &[1, 0]).unwrap();
        assert_eq!(t.get(&[0, 1]).unwrap(), 2.0);
    }

    #[test]
    fn unsqueeze_and_squeeze() {
        let t = counter(&[3]);
        let u = t.unsqueeze(0).unwrap();
        assert_eq!(u.shape(), &[1, 3]);
        assert_eq!(u.squeeze().shape(), &[3]);
        assert!(t.unsqueeze(2).is_err());
        assert_eq!(Tensor::scalar(1.0).squeeze().shape(), &[1]);
    }
}
