//! Parameter initializers.
//!
//! Each initializer fills a freshly allocated parameter tensor in place, once,
//! when its layer is constructed. Random initializers draw from the generator
//! the layer hands in, so a seeded layer always starts from the same weights.

use core::str::FromStr;

use rand::{Rng, RngCore};

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Supported fill strategies.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Initializer {
    #[default]
    Zeros,
    Constant(f64),
    /// Uniform on `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// Uniform on `±sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform,
    /// Uniform on `±sqrt(6 / fan_in)`.
    HeUniform,
    /// Uniform on `±sqrt(3 / fan_in)`.
    LeCunUniform,
}

/// `(fan_in, fan_out)` for a parameter shape.
///
/// Rank 1 uses the length for both; rank 2 uses `(rows, cols)`; higher ranks
/// multiply every dimension but the last for `fan_in` and every dimension but
/// the first for `fan_out`.
pub fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [rows, cols] => (*rows, *cols),
        _ => (
            shape[..shape.len() - 1].iter().product(),
            shape[1..].iter().product(),
        ),
    }
}

impl Initializer {
    pub fn name(&self) -> &'static str {
        match self {
            Initializer::Zeros => "zeros",
            Initializer::Constant(_) => "constant",
            Initializer::Uniform { .. } => "uniform",
            Initializer::GlorotUniform => "glorot_uniform",
            Initializer::HeUniform => "he_uniform",
            Initializer::LeCunUniform => "lecun_uniform",
        }
    }

    /// Fills `tensor` in place.
    pub fn fill(&self, tensor: &mut Tensor, rng: &mut dyn RngCore) {
        let (fan_in, fan_out) = fans(tensor.shape());
        let symmetric = |limit: f64| (-limit, limit);
        let (low, high) = match *self {
            Initializer::Zeros => {
                tensor.zero();
                return;
            }
            Initializer::Constant(v) => {
                tensor.fill(v);
                return;
            }
            Initializer::Uniform { low, high } => (low, high),
            Initializer::GlorotUniform => symmetric((6.0 / (fan_in + fan_out) as f64).sqrt()),
            Initializer::HeUniform => symmetric((6.0 / fan_in as f64).sqrt()),
            Initializer::LeCunUniform => symmetric((3.0 / fan_in as f64).sqrt()),
        };
        tensor.apply(|_| low + (high - low) * rng.random::<f64>());
    }
}

impl FromStr for Initializer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "zeros" => Ok(Initializer::Zeros),
            "ones" => Ok(Initializer::Constant(1.0)),
            "uniform" => Ok(Initializer::Uniform { low: -0.05, high: 0.05 }),
            "glorot_uniform" | "glorot" | "xavier" => Ok(Initializer::GlorotUniform),
            "he_uniform" | "he" => Ok(Initializer::HeUniform),
            "lecun_uniform" | "lecun" => Ok(Initializer::LeCunUniform),
            other => Err(Error::InvalidParameter(format!("unknown initializer `{other}`"))),
        }
    }
}
