//! Flattens each sample to a vector.

use super::{Layer, LayerBase, batch_of, not_constructed, validate_input_shape, with_batch};
use crate::error::Result;
use crate::tensors::Tensor;

/// Reshapes `(..dims)` to `(prod(dims))`, keeping a leading batch dimension.
#[derive(Debug, Default)]
pub struct Flatten {
    base: LayerBase,
    state: Option<FlattenState>,
}

#[derive(Debug)]
struct FlattenState {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    batch: Option<usize>,
    output: Tensor,
    grad_input: Tensor,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<&FlattenState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }
}

impl Layer for Flatten {
    fn kind_name(&self) -> &'static str {
        "flatten"
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
        let output_shape = vec![input_shape.iter().product()];
        self.state = Some(FlattenState {
            input_shape: input_shape.to_vec(),
            batch: None,
            output: Tensor::zeros(&output_shape)?,
            grad_input: Tensor::zeros(input_shape)?,
            output_shape,
        });
        tracing::debug!(layer = %name, ?input_shape, "constructed");
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
            state.output = Tensor::zeros(&with_batch(batch, &state.output_shape))?;
            state.grad_input = Tensor::zeros(&with_batch(batch, &state.input_shape))?;
            state.batch = batch;
        }
        state.output.copy_elements(input)?;
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        if !grad.same_shape(&state.output) {
            return Err(crate::Error::mismatch("flatten backward", state.output.shape(), grad.shape()));
        }
        state.grad_input.copy_elements(grad)?;
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
    fn flattens_samples_and_batches() {
        let mut f = Flatten::new();
        f.construct(&[2, 2]).unwrap();
        assert_eq!(f.output_shape().unwrap(), &[4]);

        let y = f.forward(&tensor!([[1.0, 2.0], [3.0, 4.0]])).unwrap();
        assert_eq!(y.shape(), &[4]);

        let batch = Tensor::zeros(&[3, 2, 2]).unwrap();
        assert_eq!(f.forward(&batch).unwrap().shape(), &[3, 4]);
        let g = f.backward(&Tensor::filled(&[3, 4], 1.0).unwrap()).unwrap();
        assert_eq!(g.shape(), &[3, 2, 2]);
    }

    #[test]
    fn output_is_a_copy() {
        let mut f = Flatten::new();
        f.construct(&[1, 2]).unwrap();
        let mut x = tensor!([[1.0, 2.0]]);
        let y = f.forward(&x).unwrap().clone();
        x.set(9.0, &[0, 0]).unwrap();
        assert_eq!(f.output().unwrap(), &y);
    }
}
