//! Default values applied when a variable is unset.

/// Listen port.
pub(crate) const PORT: u16 = 8080;
/// Listen address.
pub(crate) const BIND_ADDR: &str = "0.0.0.0";
/// Largest accepted single upload (10 MiB).
pub(crate) const MAX_UPLOAD_BYTES: u64 = 10 * MIB;
/// Hard ceiling for `MAX_UPLOAD_BYTES` (100 MiB).
pub(crate) const MAX_UPLOAD_BYTES_CEILING: u64 = 100 * MIB;
/// Files accepted by one batch request.
pub(crate) const MAX_BATCH_FILES: usize = 10;
/// Hard ceiling for `MAX_BATCH_FILES`.
pub(crate) const MAX_BATCH_FILES_CEILING: usize = 100;
/// Quality floor.
pub(crate) const QUALITY_MIN: u8 = 60;
/// Quality ceiling.
pub(crate) const QUALITY_MAX: u8 = 80;
/// Tool speed setting.
pub(crate) const SPEED: u8 = 4;
/// Slowest and fastest tool speeds.
pub(crate) const SPEED_RANGE: (u8, u8) = (1, 11);
/// Per-invocation timeout in seconds.
pub(crate) const TIMEOUT_SECONDS: u64 = 30;
/// Longest accepted per-invocation timeout in seconds.
pub(crate) const TIMEOUT_SECONDS_CEILING: u64 = 600;
/// Queue deadline for a compression slot in milliseconds.
pub(crate) const ADMISSION_DEADLINE_MS: u64 = 5_000;
/// Longest accepted queue deadline in milliseconds.
pub(crate) const ADMISSION_DEADLINE_MS_CEILING: u64 = 60_000;
/// Directory name created under the system temp dir.
pub(crate) const TEMP_DIR_NAME: &str = "pngsqueeze";
/// Tool binary, resolved on `PATH`.
pub(crate) const PNGQUANT_BIN: &str = "pngquant";

const MIB: u64 = 1024 * 1024;
