use crate::database::Status;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the harness itself. Store errors travel as `anyhow`
/// errors with context; these are the conditions the harness detects.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("lookup of key {key} returned {status:?}")]
    UnexpectedStatus { key: String, status: Status },

    #[error("value of {len} bytes does not fit a {capacity} byte buffer")]
    ValueTooLarge { len: usize, capacity: usize },

    #[error("{role} reader thread panicked")]
    ThreadPanicked { role: &'static str },

    #[error("cannot prepare data directory {path:?}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
