//! Upload, job, and result types shared by the pipeline, the tool adapter, and the HTTP layer.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CompressionFailure, CompressionResult, Violation};

/// First eight bytes of every PNG stream.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// Content type of every successful response body.
pub const PNG_CONTENT_TYPE: &str = "image/png";

const ACCEPTED_CONTENT_TYPES: &[&str] = &[PNG_CONTENT_TYPE, "application/octet-stream"];
const IHDR_OFFSET: usize = 12;

/// Upload size constraints applied before any filesystem work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Maximum accepted size of a single image.
    pub max_upload_bytes: u64,
    /// Maximum number of files in one batch request.
    pub max_batch_files: usize,
}

/// Raw image payload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    bytes: Bytes,
    declared_type: Option<String>,
    filename: Option<String>,
}

impl UploadedImage {
    /// Wrap a received payload.
    #[must_use]
    pub fn new(bytes: Bytes, declared_type: Option<String>, filename: Option<String>) -> Self {
        Self {
            bytes,
            declared_type,
            filename,
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Sanitized client filename, if one was supplied.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Check emptiness, size, declared type, and PNG structure without touching disk.
    ///
    /// # Errors
    ///
    /// Returns a validation failure naming the first violated constraint.
    pub fn validate(self, limits: &UploadLimits) -> CompressionResult<ValidatedImage> {
        if self.bytes.is_empty() {
            return Err(CompressionFailure::validation(Violation::EmptyPayload));
        }
        let size = self.size();
        if size > limits.max_upload_bytes {
            return Err(CompressionFailure::validation(Violation::PayloadTooLarge {
                size,
                limit: limits.max_upload_bytes,
            }));
        }
        if let Some(declared) = self.declared_type.as_deref()
            && !is_accepted_content_type(declared)
        {
            return Err(CompressionFailure::validation(
                Violation::UnsupportedContentType {
                    declared: declared.to_string(),
                },
            ));
        }
        if !looks_like_png(&self.bytes) {
            return Err(CompressionFailure::validation(Violation::InvalidContent));
        }
        Ok(ValidatedImage {
            bytes: self.bytes,
            filename: self.filename,
        })
    }
}

/// Upload that passed validation; only this type can be staged to disk.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    bytes: Bytes,
    filename: Option<String>,
}

impl ValidatedImage {
    /// Validated payload bytes.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Sanitized client filename, if one was supplied.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }
}

fn is_accepted_content_type(declared: &str) -> bool {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.is_empty() || ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

fn looks_like_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
        && bytes.get(IHDR_OFFSET..IHDR_OFFSET + 4) == Some(b"IHDR".as_slice())
}

/// Reduce a client-supplied filename to a safe final path component.
///
/// Returns `None` when nothing usable remains.
#[must_use]
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Inclusive quality bounds handed to the tool, each within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRange {
    min: u8,
    max: u8,
}

impl QualityRange {
    /// Upper bound accepted by the tool.
    pub const CEILING: u8 = 100;

    /// Build a range, returning `None` when bounds are inverted or above 100.
    #[must_use]
    pub const fn new(min: u8, max: u8) -> Option<Self> {
        if min > max || max > Self::CEILING {
            None
        } else {
            Some(Self { min, max })
        }
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(self) -> u8 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(self) -> u8 {
        self.max
    }
}

/// What to do when the quality floor cannot be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPolicy {
    /// Always produce the best output up to the ceiling; the floor is not enforced.
    BestEffort,
    /// Fail with `quality_not_met` when the floor cannot be reached.
    Strict,
}

/// Tool configuration applied to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    /// Quality bounds.
    pub quality: QualityRange,
    /// Speed/quality trade-off, `1` (slowest) to `11` (fastest).
    pub speed: u8,
    /// Quality floor handling.
    pub policy: QualityPolicy,
    /// Wall-clock budget for one tool invocation.
    pub timeout: Duration,
}

/// One invocation of the external tool against request-scoped files.
///
/// `input` and `output` are distinct paths inside a directory owned by exactly one request.
#[derive(Debug, Clone)]
pub struct CompressionJob {
    id: Uuid,
    input: PathBuf,
    output: PathBuf,
    input_size: u64,
    settings: CompressionSettings,
}

impl CompressionJob {
    /// Describe a job over already-staged files.
    #[must_use]
    pub fn new(
        id: Uuid,
        input: PathBuf,
        output: PathBuf,
        input_size: u64,
        settings: CompressionSettings,
    ) -> Self {
        debug_assert_ne!(input, output, "job input and output must differ");
        Self {
            id,
            input,
            output,
            input_size,
            settings,
        }
    }

    /// Job identifier (shared with the temp scope and log lines).
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Staged input path.
    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Path the tool is asked to write.
    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Size of the staged input in bytes.
    #[must_use]
    pub const fn input_size(&self) -> u64 {
        self.input_size
    }

    /// Tool configuration.
    #[must_use]
    pub const fn settings(&self) -> &CompressionSettings {
        &self.settings
    }
}

/// What the tool produced for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    /// Optimized bytes read back from the output file.
    Optimized(Bytes),
    /// The tool declined to write a result because it would not be smaller.
    NotSmaller,
}

/// Achieved size reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionRatio {
    /// `1 - output / input`.
    Ratio(f64),
    /// Input size was zero.
    NotApplicable,
}

impl CompressionRatio {
    /// Compute the ratio for the given sizes.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn from_sizes(input_size: u64, output_size: u64) -> Self {
        if input_size == 0 {
            Self::NotApplicable
        } else {
            Self::Ratio(1.0 - (output_size as f64 / input_size as f64))
        }
    }

    /// Numeric value, when applicable.
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Ratio(value) => Some(value),
            Self::NotApplicable => None,
        }
    }
}

impl Display for CompressionRatio {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ratio(value) => write!(formatter, "{value}"),
            Self::NotApplicable => formatter.write_str("n/a"),
        }
    }
}

/// Successful outcome of a job: the bytes to return and how they compare to the upload.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    bytes: Bytes,
    original_size: u64,
    used_compressed: bool,
    filename: Option<String>,
}

impl CompressedImage {
    /// Choose between tool output and the original upload, keeping whichever is smaller.
    #[must_use]
    pub fn select(original: &ValidatedImage, output: ToolOutput) -> Self {
        let original_size = original.size();
        let filename = original.filename.clone();
        match output {
            ToolOutput::Optimized(bytes) if (bytes.len() as u64) < original_size => Self {
                bytes,
                original_size,
                used_compressed: true,
                filename,
            },
            ToolOutput::Optimized(_) | ToolOutput::NotSmaller => Self {
                bytes: original.bytes.clone(),
                original_size,
                used_compressed: false,
                filename,
            },
        }
    }

    /// Bytes to send to the client.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consume into the response bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Size of the returned bytes.
    #[must_use]
    pub fn output_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Size of the upload.
    #[must_use]
    pub const fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Whether the tool output (rather than the original) is returned.
    #[must_use]
    pub const fn used_compressed(&self) -> bool {
        self.used_compressed
    }

    /// Sanitized client filename, if one was supplied.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Achieved ratio for the returned bytes.
    #[must_use]
    pub fn ratio(&self) -> CompressionRatio {
        CompressionRatio::from_sizes(self.original_size, self.output_size())
    }

    /// Per-file statistics for the stats header.
    #[must_use]
    pub fn stats(&self, fallback_name: &str) -> FileStats {
        let percent = self
            .ratio()
            .value()
            .map_or(0.0, |ratio| (ratio * 10_000.0).round() / 100.0);
        FileStats {
            filename: self.filename().unwrap_or(fallback_name).to_string(),
            original_size: self.original_size,
            final_size: self.output_size(),
            percent_reduction: percent,
            used_compressed: self.used_compressed,
        }
    }
}

/// Serialized entry of the `X-Compression-Stats` header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    /// Client filename.
    pub filename: String,
    /// Upload size in bytes.
    pub original_size: u64,
    /// Returned size in bytes.
    pub final_size: u64,
    /// Reduction in percent, two decimals.
    pub percent_reduction: f64,
    /// Whether the tool output was returned.
    pub used_compressed: bool,
}
