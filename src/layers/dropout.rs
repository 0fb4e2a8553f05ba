//! Inverted dropout.

use rand::Rng;
use rand::rngs::StdRng;

use super::{Layer, LayerBase, batch_of, not_constructed, validate_input_shape, with_batch};
use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Zeroes each unit with probability `rate` while training and scales the
/// survivors by `1 / (1 - rate)`.
///
/// A fresh mask is drawn on every training forward pass and reused by the
/// following backward pass. Outside training both passes are the identity.
#[derive(Debug)]
pub struct Dropout {
    base: LayerBase,
    rate: f64,
    rng: Option<StdRng>,
    state: Option<DropoutState>,
}

#[derive(Debug)]
struct DropoutState {
    shape: Vec<usize>,
    batch: Option<usize>,
    mask: Tensor,
    output: Tensor,
    grad_input: Tensor,
}

impl Dropout {
    /// # Errors
    /// [`Error::InvalidParameter`] unless `0 < rate < 1`.
    pub fn new(rate: f64) -> Result<Self> {
        if !(rate > 0.0 && rate < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "dropout rate must be in (0, 1), got {rate}"
            )));
        }
        Ok(Self {
            base: LayerBase::default(),
            rate,
            rng: None,
            state: None,
        })
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.base.seed = Some(seed);
        self.rng = None;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// The mask drawn by the last training forward pass.
    pub fn mask(&self) -> Result<&Tensor> {
        Ok(&self.state()?.mask)
    }

    fn state(&self) -> Result<&DropoutState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }
}

impl Layer for Dropout {
    fn kind_name(&self) -> &'static str {
        "dropout"
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
        self.state = Some(DropoutState {
            shape: input_shape.to_vec(),
            batch: None,
            mask: Tensor::zeros(input_shape)?.with_name("mask"),
            output: Tensor::zeros(input_shape)?,
            grad_input: Tensor::zeros(input_shape)?,
        });
        self.rng = Some(self.base.rng());
        tracing::debug!(layer = %name, ?input_shape, rate = self.rate, "constructed");
        Ok(())
    }

    fn is_constructed(&self) -> bool {
        self.state.is_some()
    }

    fn initialize(&mut self) -> Result<()> {
        self.ensure_constructed()?;
        self.rng = Some(self.base.rng());
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let (state, rng) = match (self.state.as_mut(), self.rng.as_mut()) {
            (Some(state), Some(rng)) => (state, rng),
            _ => return Err(not_constructed(name)),
        };
        let batch = batch_of(&name, input.shape(), &state.shape)?;
        if batch != state.batch {
            tracing::trace!(layer = %name, from = ?state.batch, to = ?batch, "relayout for batch");
            let shape = with_batch(batch, &state.shape);
            state.mask = Tensor::zeros(&shape)?.with_name("mask");
            state.output = Tensor::zeros(&shape)?;
            state.grad_input = Tensor::zeros(&shape)?;
            state.batch = batch;
        }

        state.output.copy_from(input)?;
        if self.base.training {
            let (rate, keep) = (self.rate, 1.0 / (1.0 - self.rate));
            state.mask.apply(|_| if rng.random::<f64>() >= rate { keep } else { 0.0 });
            state.output.mul(&state.mask)?;
        }
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        state.grad_input.copy_from(grad)?;
        if self.base.training {
            state.grad_input.mul(&state.mask)?;
        }
        Ok(&state.grad_input)
    }

    fn input_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.shape)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.shape)
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

    #[test]
    fn rate_must_be_open_interval() {
        for rate in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(Dropout::new(rate), Err(Error::InvalidParameter(_))));
        }
    }

    #[test]
    fn identity_outside_training() {
        let mut d = Dropout::new(0.5).unwrap();
        d.construct(&[4]).unwrap();
        let x = Tensor::filled(&[4], 2.0).unwrap();
        assert_eq!(d.forward(&x).unwrap(), &x);
        assert_eq!(d.backward(&x).unwrap(), &x);
    }

    #[test]
    fn backward_reuses_forward_mask() {
        let mut d = Dropout::new(0.5).unwrap().seed(42);
        d.construct(&[64]).unwrap();
        d.set_training(true);

        let y = d.forward(&Tensor::filled(&[64], 1.0).unwrap()).unwrap().clone();
        assert!(y.iter().all(|v| v == 0.0 || v == 2.0));
        assert!(y.iter().any(|v| v == 0.0) && y.iter().any(|v| v == 2.0));

        let g = d.backward(&Tensor::filled(&[64], 1.0).unwrap()).unwrap();
        assert_eq!(g, &y);
        assert_eq!(d.mask().unwrap(), &y);
    }

    #[test]
    fn seeded_masks_repeat() {
        let run = || {
            let mut d = Dropout::new(0.3).unwrap().seed(7);
            d.construct(&[2, 8]).unwrap();
            d.set_training(true);
            d.forward(&Tensor::filled(&[2, 8], 1.0).unwrap()).unwrap().clone()
        };
        assert_eq!(run(), run());
    }
}
