//! # Design
//!
//! - Constant messages; the operation and path travel as fields.
//! - Source errors are preserved so callers can classify them further.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for temporary storage operations.
pub type TempFsResult<T> = Result<T, TempFsError>;

/// Errors produced while managing request-scoped files.
#[derive(Debug, Error)]
pub enum TempFsError {
    /// Filesystem operation failed.
    #[error("temporary storage io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The blocking worker running the operation panicked or was cancelled.
    #[error("temporary storage worker failed")]
    Worker {
        /// Operation that was running.
        operation: &'static str,
        /// Join failure reported by the runtime.
        source: tokio::task::JoinError,
    },
}

impl TempFsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Operation identifier carried by every variant.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Io { operation, .. } | Self::Worker { operation, .. } => operation,
        }
    }

    /// Path involved, when the failure concerns one.
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            Self::Worker { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn io_variant_keeps_context_out_of_message() {
        let err = TempFsError::io("write_input", "/tmp/job/input.png", io::Error::other("full"));
        assert_eq!(err.to_string(), "temporary storage io failure");
        assert_eq!(err.operation(), "write_input");
        assert_eq!(
            err.path().map(|path| path.display().to_string()).as_deref(),
            Some("/tmp/job/input.png")
        );
        assert!(err.source().is_some());
    }
}
