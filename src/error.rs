//! Error taxonomy shared by tensors, kernels and layers.
//!
//! Every failure here is a programmer error surfaced at the call site. Nothing
//! is retried; callers are expected to abort the current construction or
//! training run.

use thiserror::Error;

/// Errors produced by `briny_nn`.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or non-positive dimensions, or a construction formula that
    /// yields a non-positive output dimension.
    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<usize>, reason: String },

    /// A tensor is structurally incompatible with what an operation expects.
    #[error("{op}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Element count does not match the requested shape.
    #[error("shape {shape:?} holds {expected} elements, got {actual}")]
    SizeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Element access outside the tensor bounds.
    #[error("index {index:?} out of range for shape {shape:?}")]
    IndexOutOfRange { index: Vec<usize>, shape: Vec<usize> },

    /// A layer operation was invoked before `construct`.
    #[error("layer `{layer}` has not been constructed")]
    NotConstructed { layer: String },

    /// Capability query on a layer that lacks it.
    #[error("layer `{layer}` does not support `{capability}`")]
    UnsupportedForLayer {
        layer: String,
        capability: &'static str,
    },

    /// A configuration value is outside its accepted range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A parameter file failed validation.
    #[error("corrupt model file: {0}")]
    CorruptModel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_shape(shape: &[usize], reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            shape: shape.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(op: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            op,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
