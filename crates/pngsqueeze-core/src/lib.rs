//! Domain model shared by every pngsqueeze crate.
//!
//! Owns upload validation, compression settings, the failure taxonomy, the
//! concurrency gate, and the [`Compressor`] seam implemented by tool adapters.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod error;
pub mod gate;
pub mod model;
pub mod service;

pub use error::{
    BoxedSource, CompressionFailure, CompressionResult, FailureKind, ToolFailureCause, Violation,
};
pub use gate::{AdmissionPolicy, ConcurrencyGate, ConcurrencySlot};
pub use model::{
    CompressedImage, CompressionJob, CompressionRatio, CompressionSettings, FileStats,
    PNG_CONTENT_TYPE, PNG_SIGNATURE, QualityPolicy, QualityRange, ToolOutput, UploadLimits,
    UploadedImage, ValidatedImage, sanitize_filename,
};
pub use service::{Compressor, ToolInfo};
