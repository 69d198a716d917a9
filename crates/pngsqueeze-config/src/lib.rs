//! Startup configuration for pngsqueeze.
//!
//! # Design
//! - Read once from the environment into an immutable [`ServiceConfig`].
//! - Every variable has a default and a valid range; anything outside it fails
//!   startup with the offending variable named.
//! - The lookup function is injectable so tests never touch the process environment.
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

mod defaults;
pub mod error;
mod validate;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use pngsqueeze_core::{
    AdmissionPolicy, CompressionSettings, QualityPolicy, QualityRange, UploadLimits,
};
use pngsqueeze_telemetry::{DEFAULT_LOG_LEVEL, LogFormat};

pub use error::{ConfigError, ConfigResult};

use validate::{non_empty, parse_bounded, parse_flag, parse_ip};

/// Immutable service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Socket the HTTP server binds.
    pub bind_addr: SocketAddr,
    /// Upload size and batch limits.
    pub limits: UploadLimits,
    /// Settings applied to every compression job.
    pub compression: CompressionSettings,
    /// Concurrency gate size.
    pub max_concurrent_jobs: usize,
    /// Behaviour when the gate is full.
    pub admission: AdmissionPolicy,
    /// Root for request-scoped temporary directories.
    pub temp_dir: PathBuf,
    /// `pngquant` binary name or path.
    pub pngquant_bin: PathBuf,
    /// Log filter directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl ServiceConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first rejected variable.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first rejected variable.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self::load(&lookup, cores)
    }

    fn load<F>(lookup: &F, cores: usize) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key);

        let port = parse_bounded("PORT", get("PORT").as_deref(), defaults::PORT, 1, u16::MAX)?;
        let ip = parse_ip("BIND_ADDR", get("BIND_ADDR").as_deref(), defaults::BIND_ADDR)?;

        let limits = UploadLimits {
            max_upload_bytes: parse_bounded(
                "MAX_UPLOAD_BYTES",
                get("MAX_UPLOAD_BYTES").as_deref(),
                defaults::MAX_UPLOAD_BYTES,
                1,
                defaults::MAX_UPLOAD_BYTES_CEILING,
            )?,
            max_batch_files: parse_bounded(
                "MAX_BATCH_FILES",
                get("MAX_BATCH_FILES").as_deref(),
                defaults::MAX_BATCH_FILES,
                1,
                defaults::MAX_BATCH_FILES_CEILING,
            )?,
        };

        let quality_min = parse_bounded(
            "COMPRESSION_QUALITY_MIN",
            get("COMPRESSION_QUALITY_MIN").as_deref(),
            defaults::QUALITY_MIN,
            0,
            QualityRange::CEILING,
        )?;
        let quality_max = parse_bounded(
            "COMPRESSION_QUALITY_MAX",
            get("COMPRESSION_QUALITY_MAX").as_deref(),
            defaults::QUALITY_MAX,
            0,
            QualityRange::CEILING,
        )?;
        let quality = QualityRange::new(quality_min, quality_max).ok_or_else(|| {
            ConfigError::invalid(
                "COMPRESSION_QUALITY_MIN",
                quality_min.to_string(),
                "must not exceed COMPRESSION_QUALITY_MAX",
            )
        })?;

        let (speed_min, speed_max) = defaults::SPEED_RANGE;
        let speed = parse_bounded(
            "COMPRESSION_SPEED",
            get("COMPRESSION_SPEED").as_deref(),
            defaults::SPEED,
            speed_min,
            speed_max,
        )?;
        let strict = parse_flag(
            "COMPRESSION_STRICT",
            get("COMPRESSION_STRICT").as_deref(),
            false,
        )?;
        let timeout_secs = parse_bounded(
            "COMPRESSION_TIMEOUT_SECONDS",
            get("COMPRESSION_TIMEOUT_SECONDS").as_deref(),
            defaults::TIMEOUT_SECONDS,
            1,
            defaults::TIMEOUT_SECONDS_CEILING,
        )?;
        let compression = CompressionSettings {
            quality,
            speed,
            policy: if strict {
                QualityPolicy::Strict
            } else {
                QualityPolicy::BestEffort
            },
            timeout: Duration::from_secs(timeout_secs),
        };

        let cores = cores.max(1);
        let max_concurrent_jobs = parse_bounded(
            "MAX_CONCURRENT_JOBS",
            get("MAX_CONCURRENT_JOBS").as_deref(),
            cores,
            1,
            cores,
        )?;
        let admission = parse_admission(
            get("ADMISSION_POLICY").as_deref(),
            get("ADMISSION_DEADLINE_MS").as_deref(),
        )?;

        let temp_dir = non_empty(get("TEMP_DIR").as_deref()).map_or_else(
            || std::env::temp_dir().join(defaults::TEMP_DIR_NAME),
            PathBuf::from,
        );
        let pngquant_bin = PathBuf::from(
            non_empty(get("PNGQUANT_BIN").as_deref()).unwrap_or(defaults::PNGQUANT_BIN),
        );

        let log_level = non_empty(get("LOG_LEVEL").as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string();
        let log_format = match get("LOG_FORMAT") {
            Some(raw) if non_empty(Some(&raw)).is_some() => LogFormat::parse(&raw)
                .ok_or_else(|| ConfigError::invalid("LOG_FORMAT", raw, "must be json or pretty"))?,
            _ => LogFormat::infer(),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            limits,
            compression,
            max_concurrent_jobs,
            admission,
            temp_dir,
            pngquant_bin,
            log_level,
            log_format,
        })
    }
}

fn parse_admission(policy: Option<&str>, deadline: Option<&str>) -> ConfigResult<AdmissionPolicy> {
    let deadline_ms = parse_bounded(
        "ADMISSION_DEADLINE_MS",
        deadline,
        defaults::ADMISSION_DEADLINE_MS,
        1,
        defaults::ADMISSION_DEADLINE_MS_CEILING,
    )?;
    match non_empty(policy).map(str::to_ascii_lowercase).as_deref() {
        None | Some("queue") => Ok(AdmissionPolicy::QueueWithDeadline(Duration::from_millis(
            deadline_ms,
        ))),
        Some("reject") => Ok(AdmissionPolicy::RejectImmediately),
        Some(_) => Err(ConfigError::invalid(
            "ADMISSION_POLICY",
            policy.unwrap_or_default(),
            "must be queue or reject",
        )),
    }
}
