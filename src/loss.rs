//! Loss functions.
//!
//! Each returns the scalar loss together with its gradient w.r.t. the
//! prediction, ready to hand to [`Sequential::backward`](crate::model::Sequential::backward).

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Mean squared error over every element.
///
/// Returns `(mean((p - t)²), 2 (p - t) / n)`.
///
/// # Errors
/// [`Error::ShapeMismatch`] unless `prediction` and `target` have the same shape.
///
/// ```
/// use briny_nn::{loss, tensor};
///
/// let (value, grad) = loss::mse(&tensor!([1.0, 3.0]), &tensor!([0.0, 1.0])).unwrap();
/// assert_eq!(value, 2.5);
/// assert_eq!(grad.to_vec(), vec![1.0, 2.0]);
/// ```
pub fn mse(prediction: &Tensor, target: &Tensor) -> Result<(f64, Tensor)> {
    if !prediction.same_shape(target) {
        return Err(Error::mismatch("mse", prediction.shape(), target.shape()));
    }
    let n = prediction.len() as f64;
    let diff = prediction.zip_map(target, |p, t| p - t)?;
    let value = diff.iter().map(|d| d * d).sum::<f64>() / n;
    let grad = diff.map(|d| 2.0 * d / n);
    Ok((value, grad))
}
