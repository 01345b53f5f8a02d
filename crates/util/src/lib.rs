//! Small helpers shared by the other httpcase crates, kept separate so the
//! frequently-changing crates don't drag them through recompiles.
//!
//! **This crate is not semver compliant**. The version is locked to the root
//! `httpcase` crate version. If you choose to depend directly on this crate,
//! you do so at your own risk of breakage.

#[cfg(any(test, feature = "test"))]
mod test_util;

use std::fmt::Display;
use tracing::error;

/// Log-and-forward for fallible operations. Meant for public entry points,
/// where a failure should land in the tracing output even though the caller
/// also receives it through the normal `Result` channel.
pub trait LogError: Sized {
    /// Emit the error, if there is one, at error level, then hand the value
    /// back unchanged for `?` propagation.
    fn log_error(self) -> Self;
}

impl<T, E: Display> LogError for Result<T, E> {
    fn log_error(self) -> Self {
        if let Err(error) = &self {
            error!("{error}");
        }
        self
    }
}
