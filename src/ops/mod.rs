//! # Operator Engine
//!
//! Stateless numeric kernels shared by every layer.
//!
//! ## Submodules
//!
//! - [`cpu`] — Slice-level kernels (matmul, 2D correlation/convolution, pooling),
//!   optionally split across `rayon` workers
//! - [`dispatch`] — Tensor-level entry points that validate shapes and route to [`cpu`]
//!
//! Composite layer routines (Dense and Conv2D forward/backward, pooling over
//! channels) live in [`crate::backprop`] and are built from these pieces.
//!
//! ## Notes
//!
//! - All arithmetic is `f64`
//! - Window sums are formed in row-major order before touching the destination
//! - Kernels are safe to call concurrently on disjoint destinations
//!
//! Example:
//! ```rust
//! use briny_nn::{tensor, ops::dispatch::mat_mul};
//!
//! let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let b = tensor!([[5.0, 6.0], [7.0, 8.0]]);
//! assert_eq!(mat_mul(&a, &b).unwrap().to_vec(), vec![19.0, 22.0, 43.0, 50.0]);
//! ```

pub mod cpu;
pub mod dispatch;
