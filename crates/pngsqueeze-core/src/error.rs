//! # Design
//!
//! - One classified failure type flows from the point of detection to the HTTP edge.
//! - Messages stay constant; context lives in structured fields.
//! - `FailureKind` is the stable, machine-readable classification; it never degrades
//!   on the way up.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::gate::AdmissionPolicy;

/// Result alias for a single compression job.
pub type CompressionResult<T> = Result<T, CompressionFailure>;

/// Boxed source error carried by resource failures.
pub type BoxedSource = Box<dyn Error + Send + Sync>;

/// Constraint violated by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The payload carried zero bytes.
    EmptyPayload,
    /// The payload bytes are not a PNG image.
    InvalidContent,
    /// The payload exceeded the configured maximum.
    PayloadTooLarge {
        /// Observed payload size in bytes.
        size: u64,
        /// Configured maximum in bytes.
        limit: u64,
    },
    /// The request body was cut off at the transport cap before it was fully read.
    BodyTooLarge {
        /// Configured per-image maximum in bytes.
        limit: u64,
    },
    /// The declared content type is not PNG.
    UnsupportedContentType {
        /// Content type supplied by the client.
        declared: String,
    },
    /// A batch upload used a filename without the `.png` extension.
    NotPngFilename {
        /// Sanitized filename supplied by the client.
        filename: String,
    },
    /// A multipart body carried no file fields.
    NoFiles,
    /// A batch upload carried more files than allowed.
    TooManyFiles {
        /// Number of files received.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },
    /// The request body could not be decoded.
    MalformedBody {
        /// Decoder detail.
        detail: String,
    },
}

impl Violation {
    /// Machine-readable name of the violated constraint.
    #[must_use]
    pub const fn constraint(&self) -> &'static str {
        match self {
            Self::EmptyPayload => "empty_payload",
            Self::InvalidContent => "invalid_content",
            Self::PayloadTooLarge { .. } | Self::BodyTooLarge { .. } => "payload_too_large",
            Self::UnsupportedContentType { .. } => "unsupported_content_type",
            Self::NotPngFilename { .. } => "not_png_filename",
            Self::NoFiles => "no_files",
            Self::TooManyFiles { .. } => "too_many_files",
            Self::MalformedBody { .. } => "malformed_body",
        }
    }
}

impl Display for Violation {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPayload => formatter.write_str("empty payload"),
            Self::InvalidContent => {
                formatter.write_str("invalid content: payload is not a PNG image")
            }
            Self::PayloadTooLarge { size, limit } => {
                write!(formatter, "payload of {size} bytes exceeds the {limit} byte limit")
            }
            Self::BodyTooLarge { limit } => {
                write!(formatter, "request body exceeds the {limit} byte limit")
            }
            Self::UnsupportedContentType { declared } => {
                write!(formatter, "unsupported content type '{declared}', expected image/png")
            }
            Self::NotPngFilename { filename } => {
                write!(formatter, "only PNG allowed, invalid file: {filename}")
            }
            Self::NoFiles => formatter.write_str("no files received"),
            Self::TooManyFiles { count, limit } => {
                write!(formatter, "received {count} files, maximum {limit} allowed")
            }
            Self::MalformedBody { detail } => write!(formatter, "malformed request body: {detail}"),
        }
    }
}

/// Why the external tool refused or failed a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFailureCause {
    /// Strict mode: the minimum requested quality could not be reached.
    QualityNotMet,
    /// The tool could not decode the input image.
    InputRejected,
    /// Any other non-zero exit or abnormal termination.
    Failed,
}

/// Stable classification of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Client input was malformed.
    Validation,
    /// Local I/O failed.
    Resource,
    /// The external tool is missing or not executable.
    ToolUnavailable,
    /// Strict mode quality floor was not reached.
    QualityNotMet,
    /// The tool rejected the input image.
    InputRejected,
    /// The tool failed for another reason.
    Compression,
    /// The tool exited successfully without usable output.
    ToolContract,
    /// The job exceeded its deadline.
    Timeout,
    /// No concurrency slot was available.
    Overload,
}

impl FailureKind {
    /// Snake-case label used in logs, metrics, and problem documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::ToolUnavailable => "tool_unavailable",
            Self::QualityNotMet => "quality_not_met",
            Self::InputRejected => "input_rejected",
            Self::Compression => "compression",
            Self::ToolContract => "tool_contract",
            Self::Timeout => "timeout",
            Self::Overload => "overload",
        }
    }
}

/// Classified failure of a compression request.
#[derive(Debug, Error)]
pub enum CompressionFailure {
    /// The upload violated a validation constraint.
    #[error("upload failed validation")]
    Validation {
        /// Violated constraint.
        violation: Violation,
    },
    /// A local filesystem or process-management operation failed.
    #[error("temporary resource operation failed")]
    Resource {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved, when known.
        path: Option<PathBuf>,
        /// Underlying failure.
        #[source]
        source: BoxedSource,
    },
    /// The external tool is missing or cannot be executed.
    #[error("compression tool unavailable")]
    ToolUnavailable {
        /// Tool path or name that was checked.
        tool: PathBuf,
        /// Machine-readable reason.
        reason: &'static str,
        /// Underlying IO error when available.
        #[source]
        source: Option<std::io::Error>,
    },
    /// The tool ran and exited unsuccessfully.
    #[error("compression tool failed")]
    Compression {
        /// Classified cause.
        cause: ToolFailureCause,
        /// Exit code, absent when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        diagnostic: String,
    },
    /// The tool exited successfully but produced no usable output.
    #[error("compression tool violated its output contract")]
    ToolContract {
        /// Expected output path.
        output: PathBuf,
        /// Static description of the violation.
        detail: &'static str,
    },
    /// The job exceeded its deadline and the child process was terminated.
    #[error("compression job timed out")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The concurrency gate refused admission.
    #[error("compression capacity exhausted")]
    Overload {
        /// Policy that produced the refusal.
        policy: AdmissionPolicy,
        /// Suggested client backoff.
        retry_after: Duration,
    },
}

impl CompressionFailure {
    /// Build a validation failure.
    #[must_use]
    pub const fn validation(violation: Violation) -> Self {
        Self::Validation { violation }
    }

    /// Build a resource failure from any error source.
    pub fn resource(
        operation: &'static str,
        path: Option<PathBuf>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::Resource {
            operation,
            path,
            source: source.into(),
        }
    }

    /// Stable classification for this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Resource { .. } => FailureKind::Resource,
            Self::ToolUnavailable { .. } => FailureKind::ToolUnavailable,
            Self::Compression { cause, .. } => match cause {
                ToolFailureCause::QualityNotMet => FailureKind::QualityNotMet,
                ToolFailureCause::InputRejected => FailureKind::InputRejected,
                ToolFailureCause::Failed => FailureKind::Compression,
            },
            Self::ToolContract { .. } => FailureKind::ToolContract,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Overload { .. } => FailureKind::Overload,
        }
    }

    /// Human-readable detail suitable for an error response body.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Validation { violation } => violation.to_string(),
            Self::Resource { operation, .. } => {
                format!("temporary storage operation '{operation}' failed")
            }
            Self::ToolUnavailable { reason, .. } => {
                format!("compression tool unavailable: {reason}")
            }
            Self::Compression {
                exit_code,
                diagnostic,
                ..
            } => {
                let code = exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string());
                if diagnostic.is_empty() {
                    format!("compression tool exited with {code}")
                } else {
                    format!("compression tool exited with {code}: {diagnostic}")
                }
            }
            Self::ToolContract { detail, .. } => {
                format!("compression tool produced no usable output: {detail}")
            }
            Self::Timeout { timeout } => {
                format!("compression exceeded {} ms", timeout.as_millis())
            }
            Self::Overload { .. } => "all compression slots are busy, retry later".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn kinds_are_distinct_per_cause() {
        let quality = CompressionFailure::Compression {
            cause: ToolFailureCause::QualityNotMet,
            exit_code: Some(99),
            diagnostic: String::new(),
        };
        let rejected = CompressionFailure::Compression {
            cause: ToolFailureCause::InputRejected,
            exit_code: Some(25),
            diagnostic: "libpng error".to_string(),
        };
        let failed = CompressionFailure::Compression {
            cause: ToolFailureCause::Failed,
            exit_code: None,
            diagnostic: String::new(),
        };
        assert_eq!(quality.kind(), FailureKind::QualityNotMet);
        assert_eq!(rejected.kind(), FailureKind::InputRejected);
        assert_eq!(failed.kind(), FailureKind::Compression);
        assert_eq!(failed.detail(), "compression tool exited with signal");
        assert_eq!(
            rejected.detail(),
            "compression tool exited with 25: libpng error"
        );
    }

    #[test]
    fn violation_details_name_the_constraint() {
        let empty = CompressionFailure::validation(Violation::EmptyPayload);
        assert_eq!(empty.kind(), FailureKind::Validation);
        assert_eq!(empty.detail(), "empty payload");

        let invalid = CompressionFailure::validation(Violation::InvalidContent);
        assert!(invalid.detail().starts_with("invalid content"));
        assert_eq!(Violation::InvalidContent.constraint(), "invalid_content");
    }

    #[test]
    fn resource_failure_preserves_source() {
        let failure = CompressionFailure::resource(
            "write_input",
            Some(PathBuf::from("/tmp/job/input.png")),
            io::Error::other("disk full"),
        );
        assert_eq!(failure.to_string(), "temporary resource operation failed");
        assert!(failure.source().is_some());
        assert_eq!(failure.kind().as_str(), "resource");
    }
}
