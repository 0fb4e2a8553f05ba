//! Activation functions.
//!
//! Activations are a closed set resolved when a layer is configured. A layer
//! applies `forward(pre_activation, output)` after its weighted sum, and on the
//! way back calls `backward(layer)`, which rescales the layer's output gradient
//! in place before the layer's own backward math runs.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Access to the tensors an activation's backward pass needs.
pub trait Activated {
    /// `(pre_activation, output, grad_output)` of the owning layer.
    fn activation_buffers(&mut self) -> (&Tensor, &Tensor, &mut Tensor);
}

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    /// Identity.
    #[default]
    Linear,
    Relu,
    /// `x` for positive inputs, `alpha * x` otherwise.
    LeakyRelu(f64),
    Sigmoid,
    Tanh,
    /// Normalized exponentials along the last axis (per sample).
    Softmax,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Applies `f` to each row of length `width`.
fn rows_in_place(t: &mut Tensor, width: usize, mut f: impl FnMut(&mut [f64])) {
    let mut values = t.to_vec();
    for row in values.chunks_mut(width) {
        f(row);
    }
    t.write_values(&values);
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::LeakyRelu(_) => "leaky_relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }

    /// Writes `f(pre_activation)` into `output`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless both tensors have the same shape.
    pub fn forward(&self, pre_activation: &Tensor, output: &mut Tensor) -> Result<()> {
        match *self {
            Activation::Linear => output.copy_from(pre_activation).map(drop),
            Activation::Relu => output.apply_from(pre_activation, |x| x.max(0.0)).map(drop),
            Activation::LeakyRelu(alpha) => output
                .apply_from(pre_activation, |x| if x > 0.0 { x } else { alpha * x })
                .map(drop),
            Activation::Sigmoid => output.apply_from(pre_activation, sigmoid).map(drop),
            Activation::Tanh => output.apply_from(pre_activation, f64::tanh).map(drop),
            Activation::Softmax => {
                output.copy_from(pre_activation)?;
                let width = *output.shape().last().unwrap_or(&1);
                rows_in_place(output, width, |row| {
                    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let mut total = 0.0;
                    for v in row.iter_mut() {
                        *v = (*v - max).exp();
                        total += *v;
                    }
                    for v in row.iter_mut() {
                        *v /= total;
                    }
                });
                Ok(())
            }
        }
    }

    /// Replaces the layer's output gradient with the gradient of the
    /// pre-activation sum.
    pub fn backward<L: Activated + ?Sized>(&self, layer: &mut L) -> Result<()> {
        let (pre, out, grad) = layer.activation_buffers();
        match *self {
            Activation::Linear => Ok(()),
            Activation::Relu => grad
                .apply_zip(pre, &grad.view(), |z, g| if z > 0.0 { g } else { 0.0 })
                .map(drop),
            Activation::LeakyRelu(alpha) => grad
                .apply_zip(pre, &grad.view(), |z, g| if z > 0.0 { g } else { alpha * g })
                .map(drop),
            Activation::Sigmoid => grad
                .apply_zip(out, &grad.view(), |y, g| y * (1.0 - y) * g)
                .map(drop),
            Activation::Tanh => grad
                .apply_zip(out, &grad.view(), |y, g| (1.0 - y * y) * g)
                .map(drop),
            Activation::Softmax => {
                if !grad.same_shape(out) {
                    return Err(Error::mismatch("softmax", out.shape(), grad.shape()));
                }
                let width = *out.shape().last().unwrap_or(&1);
                let probs = out.to_vec();
                let mut row_index = 0;
                rows_in_place(grad, width, |g| {
                    let p = &probs[row_index * width..(row_index + 1) * width];
                    let dot: f64 = g.iter().zip(p).map(|(g, p)| g * p).sum();
                    for (g, p) in g.iter_mut().zip(p) {
                        *g = p * (*g - dot);
                    }
                    row_index += 1;
                });
                Ok(())
            }
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    /// Parses names such as `"relu"`, `"Sigmoid"` or `"leaky_relu"` (alpha 0.01).
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "linear" | "identity" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu(0.01)),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "softmax" => Ok(Activation::Softmax),
            other => Err(Error::InvalidParameter(format!("unknown activation `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    struct Buffers {
        pre: Tensor,
        out: Tensor,
        grad: Tensor,
    }

    impl Activated for Buffers {
        fn activation_buffers(&mut self) -> (&Tensor, &Tensor, &mut Tensor) {
            (&self.pre, &self.out, &mut self.grad)
        }
    }

    fn run(act: Activation, pre: Tensor, grad: Tensor) -> Buffers {
        let mut out = Tensor::zeros(pre.shape()).unwrap();
        act.forward(&pre, &mut out).unwrap();
        let mut b = Buffers { pre, out, grad };
        act.backward(&mut b).unwrap();
        b
    }

    #[test]
    fn relu_masks_negative_inputs() {
        let b = run(Activation::Relu, tensor!([-1.0, 0.0, 2.0]), tensor!([1.0, 1.0, 1.0]));
        assert_eq!(b.out.to_vec(), vec![0.0, 0.0, 2.0]);
        assert_eq!(b.grad.to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn sigmoid_uses_stored_output() {
        let b = run(Activation::Sigmoid, tensor!([0.0]), tensor!([2.0]));
        assert_eq!(b.out.to_vec(), vec![0.5]);
        assert_eq!(b.grad.to_vec(), vec![0.5]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let b = run(
            Activation::Softmax,
            tensor!([[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]),
            tensor!([[1.0, 1.0, 1.0], [1.0, 0.0, 0.0]]),
        );
        let out = b.out.to_vec();
        assert!((out[..3].iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((out[3] - 1.0 / 3.0).abs() < 1e-12);
        // a uniform upstream gradient vanishes through softmax
        assert!(b.grad.to_vec()[..3].iter().all(|g| g.abs() < 1e-12));
    }

    #[test]
    fn parses_names() {
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("leaky-relu".parse::<Activation>().unwrap(), Activation::LeakyRelu(0.01));
        assert!("swishy".parse::<Activation>().is_err());
        assert_eq!(Activation::Tanh.to_string(), "tanh");
    }
}
