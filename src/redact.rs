//! Redaction for secrets that end up near logs.
//!
//! The operator private key lives in [`crate::config::TokenOpsConfig`]; wrapping
//! it in [`Redacted`] keeps it out of `Debug` output and `tracing` fields.

use std::fmt::{self, Debug, Display};

/// Wrapper that prints `<redacted>` instead of its inner value.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Access the wrapped secret
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
