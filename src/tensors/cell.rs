//! Shared scalar storage.
//!
//! A [`ScalarCell`] is the unit of storage behind every [`Tensor`](super::Tensor).
//! Several tensors may reference the same cell (views and slices), so the cell
//! is mutated through `&self`. The value is kept as the bit pattern of an `f64`
//! inside an `AtomicU64`, which makes cells `Sync` without `unsafe`.
//!
//! Loads and stores are individually atomic, but `add`, `mul`, `add_mul` and
//! friends are a load followed by a store. Two threads must never update the
//! same cell at the same time; the kernels in [`crate::backprop`] only spawn
//! tasks over disjoint destinations.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// A mutable `f64` that can be shared between tensors.
#[derive(Default)]
#[repr(transparent)]
pub struct ScalarCell(AtomicU64);

impl ScalarCell {
    /// A cell holding `0.0`.
    pub const fn zero() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, value: f64) {
        self.set(self.get() + value);
    }

    #[inline]
    pub fn sub(&self, value: f64) {
        self.set(self.get() - value);
    }

    #[inline]
    pub fn mul(&self, value: f64) {
        self.set(self.get() * value);
    }

    #[inline]
    pub fn div(&self, value: f64) {
        self.set(self.get() / value);
    }

    /// `self += a * b` without an intermediate cell.
    ///
    /// The product is rounded before the addition (no hardware FMA), so results
    /// match a plain `x += a * b` loop bit for bit.
    #[inline]
    pub fn add_mul(&self, a: f64, b: f64) {
        self.set(self.get() + a * b);
    }
}

impl Clone for ScalarCell {
    /// Copies the current value into a fresh, unshared cell.
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl From<f64> for ScalarCell {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for ScalarCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.get(), f)
    }
}
