//! Shared constants for the HTTP surface.

/// Header reporting the achieved compression ratio.
pub(crate) const HEADER_COMPRESSION_RATIO: &str = "x-compression-ratio";
/// Header carrying per-file statistics as a JSON array.
pub(crate) const HEADER_COMPRESSION_STATS: &str = "x-compression-stats";
/// Base URI of problem `type` values.
pub(crate) const PROBLEM_BASE: &str = "https://pngsqueeze.dev/problems/";
/// Problem kind for failures outside the compression taxonomy.
pub(crate) const PROBLEM_INTERNAL: &str = "internal";
/// Prometheus text exposition content type.
pub(crate) const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
/// Archive content type for multi-file downloads.
pub(crate) const ZIP_CONTENT_TYPE: &str = "application/zip";
/// Attachment name of multi-file downloads.
pub(crate) const ZIP_FILENAME: &str = "compressed.zip";
/// Name used when the client supplied none.
pub(crate) const FALLBACK_FILENAME: &str = "image.png";

/// Multipart boundary and part-header allowance per uploaded file, in bytes.
pub(crate) const FRAMING_ALLOWANCE: u64 = 16 * 1024;
