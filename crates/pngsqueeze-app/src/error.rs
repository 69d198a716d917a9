//! # Design
//!
//! - Centralize bootstrap errors; every variant names the operation that failed.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Loading or validating configuration failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: pngsqueeze_config::ConfigError,
    },
    /// Logging or metrics setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: pngsqueeze_telemetry::TelemetryError,
    },
    /// Preparing the temporary storage root failed.
    #[error("temporary storage operation failed")]
    TempStorage {
        /// Operation identifier.
        operation: &'static str,
        /// Source storage error.
        source: pngsqueeze_tempfs::TempFsError,
    },
    /// The compressor binary could not be located or probed.
    #[error("compressor check failed")]
    Compressor {
        /// Operation identifier.
        operation: &'static str,
        /// Source classified failure.
        source: pngsqueeze_core::CompressionFailure,
    },
    /// The HTTP server failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source server error.
        source: pngsqueeze_api::ApiServerError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: pngsqueeze_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: pngsqueeze_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn temp_storage(
        operation: &'static str,
        source: pngsqueeze_tempfs::TempFsError,
    ) -> Self {
        Self::TempStorage { operation, source }
    }

    pub(crate) const fn compressor(
        operation: &'static str,
        source: pngsqueeze_core::CompressionFailure,
    ) -> Self {
        Self::Compressor { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: pngsqueeze_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    /// Operation identifier carried by every variant.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Config { operation, .. }
            | Self::Telemetry { operation, .. }
            | Self::TempStorage { operation, .. }
            | Self::Compressor { operation, .. }
            | Self::ApiServer { operation, .. } => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::path::PathBuf;

    #[test]
    fn helpers_keep_operation_and_source() {
        let compressor = AppError::compressor(
            "compressor.locate",
            pngsqueeze_core::CompressionFailure::ToolUnavailable {
                tool: PathBuf::from("pngquant"),
                reason: "not_found",
                source: None,
            },
        );
        assert_eq!(compressor.operation(), "compressor.locate");
        assert_eq!(compressor.to_string(), "compressor check failed");
        assert!(compressor.source().is_some());

        let server = AppError::api_server(
            "api_server.serve",
            pngsqueeze_api::ApiServerError::Serve {
                source: std::io::Error::other("lost"),
            },
        );
        assert!(matches!(server, AppError::ApiServer { .. }));
        assert_eq!(server.operation(), "api_server.serve");
    }
}
