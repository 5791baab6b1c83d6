//! Formatting helpers.

use std::fmt;

/// Wrapper to override `Debug` to display the `Display` representation.
///
/// Useful for hash types whose `Display` is the human byte-order hex.
pub struct DisplayToDebug<T>(pub T);

impl<T> fmt::Debug for DisplayToDebug<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}
