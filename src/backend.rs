//! Backend selection module.
//!
//! This module defines how the engine executes its parallel sections and
//! provides functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu` — Everything runs on the calling thread.
//! - `Rayon` — Filters, samples and the three convolution gradient tasks are
//!   spread over the global `rayon` pool (default).
//!
//! Both backends produce bit-identical results: every destination element is
//! written by exactly one task, in the same order.
//!
//! The backend is stored globally using an `AtomicU8`, so it can be switched
//! at runtime without synchronizing with running kernels.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// Enumeration of supported execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Single-threaded execution.
    Cpu = 0,
    /// Multi-threaded execution on the global `rayon` pool (default).
    #[default]
    Rayon,
}

impl TryFrom<u8> for Backend {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Rayon),
            other => Err(Error::InvalidParameter(format!("unknown backend id {other}"))),
        }
    }
}

/// Internal global state for the active backend.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Rayon as u8);

/// Sets the active backend.
///
/// # Example
///
/// ```
/// use briny_nn::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// set_backend(Backend::Rayon);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active backend.
///
/// If the stored value is invalid, defaults to [`Backend::Rayon`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

/// Whether kernels may fan out onto the `rayon` pool.
pub(crate) fn parallel() -> bool {
    get_backend() == Backend::Rayon
}

/// Sizes the global `rayon` pool.
///
/// Must run before any parallel kernel touches the pool.
///
/// # Errors
/// [`Error::InvalidParameter`] if the pool was already initialized.
pub fn init_thread_pool(num_threads: usize) -> Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .map_err(|e| Error::InvalidParameter(format!("thread pool: {e}")))?;
    tracing::debug!(num_threads, "configured rayon pool");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        assert_eq!(Backend::try_from(0).unwrap(), Backend::Cpu);
        assert_eq!(Backend::try_from(1).unwrap(), Backend::Rayon);
        assert!(Backend::try_from(7).is_err());
        assert_eq!(Backend::default(), Backend::Rayon);
    }
}
