//! Startup sequence: configuration, logging, storage, compressor check, serve.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pngsqueeze_api::{ApiServer, PipelineParts, RequestPipeline};
use pngsqueeze_config::ServiceConfig;
use pngsqueeze_core::{AdmissionPolicy, ConcurrencyGate};
use pngsqueeze_pngquant::PngquantCompressor;
use pngsqueeze_telemetry::{GlobalContextGuard, LoggingConfig, Metrics};
use pngsqueeze_tempfs::TempRoot;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

const SERVICE_NAME: &str = "pngsqueeze";
const SCOPE_SLACK: Duration = Duration::from_secs(60);
const BUILD_SHA: &str = match option_env!("PNGSQUEEZE_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Entry point for the pngsqueeze boot sequence.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot be installed, the temp
/// root is unusable, the compressor is unavailable, or the server fails.
pub async fn run_app() -> AppResult<()> {
    let config =
        ServiceConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    pngsqueeze_telemetry::init_logging(&LoggingConfig {
        level: &config.log_level,
        format: config.log_format,
        build_sha: BUILD_SHA,
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(SERVICE_NAME);

    info!("pngsqueeze bootstrap starting");
    launch(config, shutdown_signal()).await
}

/// Build every component from `config` and serve until `shutdown` resolves.
pub(crate) async fn launch<F>(config: ServiceConfig, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let telemetry =
        Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let server = build_server(&config, telemetry).await?;

    info!(addr = %config.bind_addr, "launching http listener");
    server
        .serve(config.bind_addr, shutdown)
        .await
        .map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("shutdown complete");
    Ok(())
}

/// Prepare storage and verify the compressor before anything listens, so a broken
/// deployment fails at startup rather than on the first request.
pub(crate) async fn build_server(config: &ServiceConfig, telemetry: Metrics) -> AppResult<ApiServer> {
    let temp_root = TempRoot::prepare(config.temp_dir.clone(), scope_lifetime(config))
        .map_err(|err| AppError::temp_storage("temp_root.prepare", err))?;
    info!(root = %temp_root.path().display(), "temporary storage ready");

    let compressor = PngquantCompressor::locate(config.pngquant_bin.clone())
        .await
        .map_err(|err| AppError::compressor("compressor.locate", err))?;
    info!(
        path = %compressor.binary().display(),
        version = compressor.version(),
        "compressor located"
    );

    let gate = ConcurrencyGate::new(config.max_concurrent_jobs, config.admission);
    info!(
        max_concurrent_jobs = gate.capacity(),
        admission = config.admission.as_str(),
        max_upload_bytes = config.limits.max_upload_bytes,
        quality_min = config.compression.quality.min(),
        quality_max = config.compression.quality.max(),
        policy = ?config.compression.policy,
        timeout_ms = u64::try_from(config.compression.timeout.as_millis()).unwrap_or(u64::MAX),
        "compression pipeline configured"
    );

    let pipeline = RequestPipeline::new(PipelineParts {
        limits: config.limits,
        settings: config.compression,
        temp_root,
        gate,
        compressor: Arc::new(compressor),
        metrics: telemetry.clone(),
    });
    Ok(ApiServer::new(pipeline, telemetry))
}

/// Longest a job can hold its temp scope: queueing, the tool run, and slack for
/// staging and reading back. Anything older in the temp root belongs to no live job.
fn scope_lifetime(config: &ServiceConfig) -> Duration {
    let queueing = match config.admission {
        AdmissionPolicy::QueueWithDeadline(deadline) => deadline,
        AdmissionPolicy::RejectImmediately => Duration::ZERO,
    };
    queueing
        .saturating_add(config.compression.timeout)
        .saturating_add(SCOPE_SLACK)
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
