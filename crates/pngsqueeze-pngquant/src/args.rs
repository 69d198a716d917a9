//! Argument vector handed to `pngquant`.

use std::ffi::OsString;
use std::path::Path;

use pngsqueeze_core::{CompressionSettings, QualityPolicy};

/// Build the argument list for one invocation.
///
/// Paths are passed after `--` so a file name can never be read as an option.
pub(crate) fn build_args(
    settings: &CompressionSettings,
    input: &Path,
    output: &Path,
) -> Vec<OsString> {
    let floor = match settings.policy {
        QualityPolicy::BestEffort => 0,
        QualityPolicy::Strict => settings.quality.min(),
    };
    vec![
        OsString::from(format!("--quality={floor}-{}", settings.quality.max())),
        OsString::from(format!("--speed={}", settings.speed)),
        OsString::from("--skip-if-larger"),
        OsString::from("--force"),
        OsString::from("--strip"),
        OsString::from("--output"),
        output.as_os_str().to_owned(),
        OsString::from("--"),
        input.as_os_str().to_owned(),
    ]
}
