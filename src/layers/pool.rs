//! Max and average pooling.

use super::{Layer, LayerBase, batch_of, not_constructed, validate_input_shape, with_batch};
use crate::backprop::{PoolKind, pool2d_backward, pool2d_forward, pool2d_output_shape};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Windowed reduction over each channel of a `(C, H, W)` input.
///
/// Windows start every `stride` cells. A window cut short by the bottom or
/// right border still produces an output cell covering only the cells inside
/// the input.
#[derive(Debug)]
pub struct Pool2D {
    base: LayerBase,
    kind: PoolKind,
    filter: [usize; 2],
    stride: [usize; 2],
    state: Option<PoolState>,
}

#[derive(Debug)]
struct PoolState {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    batch: Option<usize>,
    input: Tensor,
    output: Tensor,
    grad_input: Tensor,
}

impl Pool2D {
    /// Stride defaults to the filter size.
    pub fn new(kind: PoolKind, filter: [usize; 2]) -> Self {
        Self {
            base: LayerBase::default(),
            kind,
            filter,
            stride: filter,
            state: None,
        }
    }

    pub fn max(filter: [usize; 2]) -> Self {
        Self::new(PoolKind::Max, filter)
    }

    pub fn avg(filter: [usize; 2]) -> Self {
        Self::new(PoolKind::Avg, filter)
    }

    #[must_use]
    pub fn stride(mut self, stride: [usize; 2]) -> Self {
        self.stride = stride;
        self
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn filter(&self) -> [usize; 2] {
        self.filter
    }

    fn state(&self) -> Result<&PoolState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }
}

impl Layer for Pool2D {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            PoolKind::Max => "max_pool2d",
            PoolKind::Avg => "avg_pool2d",
        }
    }

    fn id(&self) -> usize {
        self.base.id
    }

    fn set_id(&mut self, id: usize) {
        self.base.id = id;
    }

    fn construct(&mut self, input_shape: &[usize]) -> Result<()> {
        let name = self.name();
        validate_input_shape(&name, input_shape)?;
        if self.filter.contains(&0) || self.stride.contains(&0) {
            return Err(Error::InvalidParameter(format!(
                "{name}: filter {:?} and stride {:?} must be positive",
                self.filter, self.stride
            )));
        }
        let output_shape = pool2d_output_shape(input_shape, self.filter, self.stride)?;
        self.state = Some(PoolState {
            input_shape: input_shape.to_vec(),
            batch: None,
            input: Tensor::zeros(input_shape)?,
            output: Tensor::zeros(&output_shape)?,
            grad_input: Tensor::zeros(input_shape)?,
            output_shape,
        });
        tracing::debug!(layer = %name, ?input_shape, filter = ?self.filter, stride = ?self.stride, "constructed");
        Ok(())
    }

    fn is_constructed(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name.clone()))?;
        let batch = batch_of(&name, input.shape(), &state.input_shape)?;
        if batch != state.batch {
            tracing::trace!(layer = %name, from = ?state.batch, to = ?batch, "relayout for batch");
            state.input = Tensor::zeros(&with_batch(batch, &state.input_shape))?;
            state.grad_input = Tensor::zeros(&with_batch(batch, &state.input_shape))?;
            state.output = Tensor::zeros(&with_batch(batch, &state.output_shape))?;
            state.batch = batch;
        }

        state.input.copy_from(input)?;
        pool2d_forward(self.kind, &state.input, self.filter, self.stride, &mut state.output)?;
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        state.grad_input.zero();
        pool2d_backward(self.kind, &state.input, grad, self.filter, self.stride, &mut state.grad_input)?;
        Ok(&state.grad_input)
    }

    fn input_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.input_shape)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.output_shape)
    }

    fn output(&self) -> Result<&Tensor> {
        Ok(&self.state()?.output)
    }

    fn grad_input(&self) -> Result<&Tensor> {
        Ok(&self.state()?.grad_input)
    }

    fn set_training(&mut self, training: bool) {
        self.base.training = training;
    }

    fn is_training(&self) -> bool {
        self.base.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn max_routes_gradient_to_winner() {
        let mut p = Pool2D::max([2, 2]);
        p.construct(&[1, 2, 2]).unwrap();
        let y = p.forward(&tensor!([[[1.0, 2.0], [3.0, 4.0]]])).unwrap();
        assert_eq!(y.to_vec(), vec![4.0]);
        let gi = p.backward(&tensor!([[[1.0]]])).unwrap();
        assert_eq!(gi.to_vec(), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn max_ties_go_to_first_cell() {
        let mut p = Pool2D::max([2, 2]);
        p.construct(&[1, 2, 2]).unwrap();
        p.forward(&tensor!([[[5.0, 5.0], [5.0, 5.0]]])).unwrap();
        let gi = p.backward(&tensor!([[[2.0]]])).unwrap();
        assert_eq!(gi.to_vec(), vec![2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn avg_border_windows_use_actual_counts() {
        let mut p = Pool2D::avg([2, 2]);
        p.construct(&[1, 3, 3]).unwrap();
        assert_eq!(p.output_shape().unwrap(), &[1, 2, 2]);
        let x = tensor!([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]);
        assert_eq!(p.forward(&x).unwrap().to_vec(), vec![3.0, 4.5, 7.5, 9.0]);

        let gi = p.backward(&tensor!([[[4.0, 2.0], [2.0, 1.0]]])).unwrap();
        assert_eq!(gi.to_vec(), vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn repeated_backward_does_not_accumulate() {
        let mut p = Pool2D::avg([2, 2]);
        p.construct(&[1, 2, 2]).unwrap();
        p.forward(&Tensor::filled(&[1, 2, 2], 1.0).unwrap()).unwrap();
        p.backward(&tensor!([[[4.0]]])).unwrap();
        let gi = p.backward(&tensor!([[[4.0]]])).unwrap();
        assert_eq!(gi.to_vec(), vec![1.0; 4]);
    }

    #[test]
    fn rejects_oversized_filter() {
        assert!(matches!(Pool2D::max([3, 3]).construct(&[1, 2, 2]), Err(Error::InvalidShape { .. })));
        assert!(matches!(Pool2D::max([2, 2]).stride([0, 1]).construct(&[1, 2, 2]), Err(Error::InvalidParameter(_))));
    }
}
