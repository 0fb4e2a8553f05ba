//! briny_nn: hand-written tensors and manual backpropagation in Rust.
//!
//! Gradients are derived by hand for each layer type instead of traced through
//! a generic autodiff graph, so every kernel and its adjoint are visible and
//! testable on their own.
//!
//! # Features
//!
//! - Row-major `f64` tensors with zero-copy views and slices over shared storage.
//! - 2D correlation, convolution (valid and full), matrix multiplication and pooling kernels.
//! - Dense, Conv2D, MaxPool2D/AvgPool2D, Dropout, Flatten and Input layers with
//!   explicit forward/backward passes and accumulating gradients.
//! - Parallel convolution gradients on `rayon`, bit-identical to the sequential path.
//! - A `.bpat` binary format for parameters.
//!
//! # Modules
//!
//! - [`tensors`] — Tensor storage, views and element-wise math.
//! - [`ops`] — Stateless numeric kernels.
//! - [`backprop`] — Layer-level forward/backward routines built from [`ops`].
//! - [`layers`] — The layer contract and concrete layers.
//! - [`activations`], [`init`] — Activation functions and parameter initializers.
//! - [`model`], [`loss`], [`optim`] — A minimal sequential training loop.
//! - [`modelio`] — Saving and loading tensors.
//! - [`backend`] — Execution backend selection.
//!
//! # Example
//!
//! ```rust
//! use briny_nn::layers::{Conv2D, Layer};
//! use briny_nn::tensors::Tensor;
//!
//! let mut conv = Conv2D::new(2, [3, 3]).seed(7);
//! conv.construct(&[1, 5, 5]).unwrap();
//! assert_eq!(conv.output_shape().unwrap(), &[2, 3, 3]);
//!
//! let x = Tensor::filled(&[1, 5, 5], 0.5).unwrap();
//! let y = conv.forward(&x).unwrap();
//! assert_eq!(y.shape(), &[2, 3, 3]);
//! ```

pub mod activations;
pub mod approx;
pub mod backend;
pub mod backprop;
pub mod error;
pub mod init;
pub mod layers;
pub mod loss;
pub mod model;
pub mod modelio;
pub mod ops;
pub mod optim;
pub mod tensors;

pub use error::{Error, Result};
pub use tensors::Tensor;
