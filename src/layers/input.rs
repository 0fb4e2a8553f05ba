//! Model entry point.

use super::{Layer, LayerBase, batch_of, not_constructed, validate_input_shape, with_batch};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Declares the sample shape a model accepts.
///
/// Forward copies its input; backward passes the gradient through.
#[derive(Debug)]
pub struct Input {
    base: LayerBase,
    shape: Vec<usize>,
    state: Option<InputState>,
}

#[derive(Debug)]
struct InputState {
    batch: Option<usize>,
    output: Tensor,
    grad_input: Tensor,
}

impl Input {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            base: LayerBase::default(),
            shape: shape.to_vec(),
            state: None,
        }
    }

    /// The declared sample shape, available before construction.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn state(&self) -> Result<&InputState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }
}

impl Layer for Input {
    fn kind_name(&self) -> &'static str {
        "input"
    }

    fn id(&self) -> usize {
        self.base.id
    }

    fn set_id(&mut self, id: usize) {
        self.base.id = id;
    }

    fn construct(&mut self, input_shape: &[usize]) -> Result<()> {
        let name = self.name();
        validate_input_shape(&name, &self.shape)?;
        if input_shape != self.shape.as_slice() {
            return Err(Error::mismatch("input construct", &self.shape, input_shape));
        }
        self.state = Some(InputState {
            batch: None,
            output: Tensor::zeros(&self.shape)?,
            grad_input: Tensor::zeros(&self.shape)?,
        });
        tracing::debug!(layer = %name, shape = ?self.shape, "constructed");
        Ok(())
    }

    fn is_constructed(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name.clone()))?;
        let batch = batch_of(&name, input.shape(), &self.shape)?;
        if batch != state.batch {
            tracing::trace!(layer = %name, from = ?state.batch, to = ?batch, "relayout for batch");
            state.output = Tensor::zeros(&with_batch(batch, &self.shape))?;
            state.grad_input = Tensor::zeros(&with_batch(batch, &self.shape))?;
            state.batch = batch;
        }
        state.output.copy_from(input)?;
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        state.grad_input.copy_from(grad)?;
        Ok(&state.grad_input)
    }

    fn input_shape(&self) -> Result<&[usize]> {
        self.ensure_constructed()?;
        Ok(&self.shape)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        self.input_shape()
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
    fn passes_values_through() {
        let mut i = Input::new(&[2]);
        i.construct(&[2]).unwrap();
        let y = i.forward(&tensor!([1.0, 2.0])).unwrap();
        assert_eq!(y.to_vec(), vec![1.0, 2.0]);
        assert_eq!(i.backward(&tensor!([3.0, 4.0])).unwrap().to_vec(), vec![3.0, 4.0]);
        assert_eq!(i.num_parameters().unwrap(), 0);
    }

    #[test]
    fn declared_shape_must_match() {
        assert!(matches!(Input::new(&[2]).construct(&[3]), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(Input::new(&[0]).construct(&[0]), Err(Error::InvalidShape { .. })));
    }
}
