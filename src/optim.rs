//! Parameter updates.

use crate::error::{Error, Result};
use crate::layers::Layer;
use crate::model::Sequential;

/// Plain stochastic gradient descent: `param -= learning_rate * grad`.
///
/// `step` leaves the accumulated gradients in place; call
/// [`Sequential::zero_gradients`] before the next accumulation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    /// # Errors
    /// [`Error::InvalidParameter`] unless the rate is finite and positive.
    pub fn new(learning_rate: f64) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "learning rate must be positive and finite, got {learning_rate}"
            )));
        }
        Ok(Self { learning_rate })
    }

    /// Updates every kernel and bias of each trainable layer.
    pub fn step(&self, model: &mut Sequential) -> Result<()> {
        for layer in model.layers_mut() {
            if !layer.is_trainable() {
                continue;
            }
            for (param, grad) in layer.parameters_and_grads()? {
                param.add_scaled(grad, -self.learning_rate)?;
            }
        }
        Ok(())
    }
}
