//! Error types for the manifest subsystem.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManifestError>;

/// The four error kinds spec'd for the manifest: an IO failure, a checksum or
/// size mismatch that cannot be repaired, a broken caller contract, and
/// allocation failure.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("io error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted manifest at {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),
}

impl ManifestError {
    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Self {
        ManifestError::Io { op, source }
    }

    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ManifestError::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        ManifestError::InvariantViolation(reason.into())
    }
}
