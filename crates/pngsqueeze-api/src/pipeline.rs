//! Request pipeline: validate, stage, admit, compress, collect, release.
//!
//! # Design
//! - Validation runs before any filesystem work; only a [`ValidatedImage`] is staged.
//! - Each job runs on its own task so a disconnected client never orphans a child
//!   process; the scope and the slot are released by that task on every path.
//! - Failures keep the kind assigned where they were detected.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use pngsqueeze_core::{
    CompressedImage, CompressionFailure, CompressionJob, CompressionResult, CompressionSettings,
    Compressor, ConcurrencyGate, ConcurrencySlot, ToolInfo, UploadLimits, UploadedImage,
    ValidatedImage,
};
use pngsqueeze_telemetry::{Metrics, current_request_id, with_request_context};
use pngsqueeze_tempfs::{TempFsError, TempRoot};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

/// Dependencies of a [`RequestPipeline`].
pub struct PipelineParts {
    /// Upload size constraints.
    pub limits: UploadLimits,
    /// Tool configuration applied to every job.
    pub settings: CompressionSettings,
    /// Root for request-scoped files.
    pub temp_root: TempRoot,
    /// Bound on concurrently running tool processes.
    pub gate: ConcurrencyGate,
    /// Compressor implementation.
    pub compressor: Arc<dyn Compressor>,
    /// Metrics registry.
    pub metrics: Metrics,
}

/// Per-request orchestration shared by every handler.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    limits: UploadLimits,
    settings: CompressionSettings,
    temp_root: TempRoot,
    gate: ConcurrencyGate,
    compressor: Arc<dyn Compressor>,
    metrics: Metrics,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Staging,
    Admit,
    Compress,
    Release,
    Join,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Staging => "stage",
            Self::Admit => "admit",
            Self::Compress => "compress",
            Self::Release => "release",
            Self::Join => "join",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

struct StageFailure {
    stage: Stage,
    failure: CompressionFailure,
}

fn at(stage: Stage) -> impl FnOnce(CompressionFailure) -> StageFailure {
    move |failure| StageFailure { stage, failure }
}

fn storage_failure(err: TempFsError) -> CompressionFailure {
    let path = err.path().cloned();
    CompressionFailure::resource(err.operation(), path, err)
}

impl RequestPipeline {
    /// Assemble a pipeline from its dependencies.
    #[must_use]
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                limits: parts.limits,
                settings: parts.settings,
                temp_root: parts.temp_root,
                gate: parts.gate,
                compressor: parts.compressor,
                metrics: parts.metrics,
            }),
        }
    }

    /// Upload constraints enforced by [`Self::process`].
    #[must_use]
    pub fn limits(&self) -> &UploadLimits {
        &self.inner.limits
    }

    /// Whether the compressor can currently be executed.
    ///
    /// # Errors
    ///
    /// Returns `tool_unavailable` when the binary is missing or not executable.
    pub fn availability(&self) -> CompressionResult<ToolInfo> {
        self.inner.compressor.availability()
    }

    /// Run one upload through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of whichever stage failed.
    pub async fn process(&self, upload: UploadedImage) -> CompressionResult<CompressedImage> {
        let image = self.inner.validate(upload)?;
        self.inner.join(self.spawn(image)).await
    }

    /// Run a batch of uploads. Every upload is validated before any is staged; jobs then
    /// run concurrently, bounded by the gate, and results keep upload order.
    ///
    /// # Errors
    ///
    /// Returns the first failure in upload order. Jobs already started still run to
    /// completion and clean up after themselves.
    pub async fn process_batch(
        &self,
        uploads: Vec<UploadedImage>,
    ) -> CompressionResult<Vec<CompressedImage>> {
        let images = uploads
            .into_iter()
            .map(|upload| self.inner.validate(upload))
            .collect::<CompressionResult<Vec<_>>>()?;
        let handles: Vec<_> = images.into_iter().map(|image| self.spawn(image)).collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(self.inner.join(handle).await?);
        }
        Ok(results)
    }

    fn spawn(&self, image: ValidatedImage) -> JoinHandle<CompressionResult<CompressedImage>> {
        let inner = Arc::clone(&self.inner);
        let id = Uuid::new_v4();
        let request_id = current_request_id().unwrap_or_default();
        let span = tracing::info_span!("compression.job", job_id = %id, request_id = %request_id);
        tokio::spawn(
            async move { with_request_context(request_id, inner.run(id, image)).await }
                .instrument(span),
        )
    }
}

impl PipelineInner {
    fn validate(&self, upload: UploadedImage) -> CompressionResult<ValidatedImage> {
        upload.validate(&self.limits).inspect_err(|failure| {
            if let CompressionFailure::Validation { violation } = failure {
                info!(constraint = violation.constraint(), detail = %violation, "upload rejected");
            }
            self.metrics.inc_job_outcome(failure.kind().as_str());
        })
    }

    async fn join(
        &self,
        handle: JoinHandle<CompressionResult<CompressedImage>>,
    ) -> CompressionResult<CompressedImage> {
        handle.await.unwrap_or_else(|err| {
            let failure = CompressionFailure::resource("join_job", None, err);
            self.record_failure(Stage::Join, 0, &failure);
            Err(failure)
        })
    }

    async fn run(&self, id: Uuid, image: ValidatedImage) -> CompressionResult<CompressedImage> {
        let started = Instant::now();
        let input_bytes = image.size();
        info!(
            input_bytes,
            quality_min = self.settings.quality.min(),
            quality_max = self.settings.quality.max(),
            policy = ?self.settings.policy,
            "compression job started"
        );

        match self.execute(id, &image).await {
            Ok(compressed) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.metrics.inc_job_outcome("completed");
                self.metrics
                    .add_job_bytes(compressed.original_size(), compressed.output_size());
                info!(
                    output_bytes = compressed.output_size(),
                    ratio = %compressed.ratio(),
                    used_compressed = compressed.used_compressed(),
                    elapsed_ms,
                    "compression job completed"
                );
                Ok(compressed)
            }
            Err(StageFailure { stage, failure }) => {
                self.record_failure(stage, input_bytes, &failure);
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        image: &ValidatedImage,
    ) -> Result<CompressedImage, StageFailure> {
        let mut scope = self
            .temp_root
            .acquire(id, image.bytes().clone())
            .await
            .map_err(|err| at(Stage::Staging)(storage_failure(err)))?;

        let slot = self.admit().await.map_err(at(Stage::Admit))?;
        let job = CompressionJob::new(
            id,
            scope.input().to_path_buf(),
            scope.output().to_path_buf(),
            image.size(),
            self.settings,
        );
        let began = Instant::now();
        let output = self.compressor.compress(&job).await;
        self.metrics.observe_job_duration(began.elapsed());
        slot.release();
        self.publish_gauges();

        let compressed = CompressedImage::select(image, output.map_err(at(Stage::Compress))?);
        scope
            .release()
            .map_err(|err| at(Stage::Release)(storage_failure(err)))?;
        Ok(compressed)
    }

    async fn admit(&self) -> CompressionResult<ConcurrencySlot> {
        let admitted = self.gate.admit().await;
        if admitted.is_err() {
            self.metrics.inc_overload();
        }
        self.publish_gauges();
        admitted
    }

    fn publish_gauges(&self) {
        self.metrics.set_jobs_in_flight(self.gate.in_flight());
        self.metrics.set_jobs_waiting(self.gate.waiting());
    }

    fn record_failure(&self, stage: Stage, input_bytes: u64, failure: &CompressionFailure) {
        let kind = failure.kind().as_str();
        self.metrics.inc_job_outcome(kind);
        match failure {
            CompressionFailure::ToolContract { output, detail } => error!(
                stage = %stage,
                kind,
                input_bytes,
                output = %output.display(),
                detail,
                quality_min = self.settings.quality.min(),
                quality_max = self.settings.quality.max(),
                speed = self.settings.speed,
                policy = ?self.settings.policy,
                "compression tool violated its output contract"
            ),
            CompressionFailure::Compression {
                exit_code,
                diagnostic,
                ..
            } => warn!(
                stage = %stage,
                kind,
                input_bytes,
                exit_code = ?exit_code,
                diagnostic = %diagnostic,
                "compression job failed"
            ),
            CompressionFailure::Resource {
                operation, source, ..
            } => error!(
                stage = %stage,
                kind,
                operation,
                error = %source,
                "compression job failed"
            ),
            other => warn!(
                stage = %stage,
                kind,
                input_bytes,
                detail = %other.detail(),
                "compression job failed"
            ),
        }
    }
}
