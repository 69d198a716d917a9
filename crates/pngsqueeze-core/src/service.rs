//! Seam between the request pipeline and the external compression tool.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::CompressionResult;
use crate::model::{CompressionJob, ToolOutput};

/// Identity of a resolved compression tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    /// Resolved executable path.
    pub path: PathBuf,
    /// Version string reported by the tool.
    pub version: String,
}

/// Runs one compression job against the paths staged in a [`CompressionJob`].
///
/// Implementations must leave the input file untouched and must terminate any
/// spawned process before returning, including on timeout.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Compress the job's input file into its output path.
    ///
    /// # Errors
    ///
    /// Returns a classified [`crate::CompressionFailure`] when the tool is missing,
    /// exits unsuccessfully, violates its output contract, or exceeds the deadline.
    async fn compress(&self, job: &CompressionJob) -> CompressionResult<ToolOutput>;

    /// Report whether the tool can currently be invoked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CompressionFailure::ToolUnavailable`] when it cannot.
    fn availability(&self) -> CompressionResult<ToolInfo>;
}
