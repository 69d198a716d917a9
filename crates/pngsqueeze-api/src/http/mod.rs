//! HTTP surface: routing, extraction, and problem responses.

/// Zip packaging for batch downloads.
pub(crate) mod archive;
/// Compression endpoints.
pub(crate) mod compress;
/// Shared header names and content types.
pub(crate) mod constants;
/// Problem response helpers and error types.
pub(crate) mod errors;
/// Health and metrics endpoints.
pub(crate) mod health;
/// Router construction and server host.
pub(crate) mod router;
/// Request metrics middleware.
pub(crate) mod telemetry;
/// Single and batch body extraction.
pub(crate) mod upload;
