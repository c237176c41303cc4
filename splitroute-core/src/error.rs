use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Shared error type for the data-model and config layer.
///
/// Platform route drivers define their own `Error` with the full
/// retryable/fatal taxonomy from the design doc; this one only covers
/// what `splitroute-core` itself can fail at: loading files.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("malformed prefix `{input}` at {path:?}:{line}")]
    MalformedPrefix { path: PathBuf, line: usize, input: String },

    #[error("malformed dns entry `{input}` at {path:?}:{line}")]
    MalformedDns { path: PathBuf, line: usize, input: String },
}
