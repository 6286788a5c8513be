//! Error types for building the compression handler.

use thiserror::Error;

/// Errors raised while constructing a handler or its options.
///
/// Write-path failures are reported as [`std::io::Error`] instead, since they
/// surface through the [`std::io::Write`] contract of the response writers.
#[derive(Error, Debug)]
pub enum Error {
    /// The configured compression level is outside `-1..=9`.
    #[error("invalid compression level: {0} (must be between -1 and 9)")]
    InvalidLevel(i32),

    /// An excluded path pattern failed to compile.
    #[error("invalid excluded path pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
