//! Scripted compressor and fixtures shared by the crate's tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pngsqueeze_core::{
    AdmissionPolicy, CompressionFailure, CompressionJob, CompressionResult, CompressionSettings,
    Compressor, ConcurrencyGate, FailureKind, PNG_SIGNATURE, QualityPolicy, QualityRange,
    ToolFailureCause, ToolInfo, ToolOutput, UploadLimits,
};
use pngsqueeze_telemetry::Metrics;
use pngsqueeze_tempfs::TempRoot;
use tempfile::TempDir;

use crate::pipeline::{PipelineParts, RequestPipeline};

pub(crate) const LIMITS: UploadLimits = UploadLimits {
    max_upload_bytes: 4_096,
    max_batch_files: 3,
};

/// Trailing byte that selects the failure branch of [`Script::FailWhenMarked`].
const MARK: u8 = 0xFF;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    /// Write and return the first half of the input.
    Shrink,
    /// Report that the result would not be smaller.
    NotSmaller,
    /// Fail every job with the given kind.
    Fail(FailureKind),
    /// Fail marked inputs with the given kind, shrink the rest.
    FailWhenMarked(FailureKind),
}

pub(crate) struct ScriptedCompressor {
    script: Script,
    delay: Duration,
    available: AtomicBool,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedCompressor {
    pub(crate) const fn new(script: Script, delay: Duration) -> Self {
        Self {
            script,
            delay,
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn run(&self, job: &CompressionJob) -> CompressionResult<ToolOutput> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let input = tokio::fs::read(job.input()).await.map_err(|err| {
            CompressionFailure::resource("read_input", Some(job.input().to_path_buf()), err)
        })?;
        let marked = input.last() == Some(&MARK);
        match self.script {
            Script::Fail(kind) => Err(failure(kind, job)),
            Script::FailWhenMarked(kind) if marked => Err(failure(kind, job)),
            Script::NotSmaller => Ok(ToolOutput::NotSmaller),
            Script::Shrink | Script::FailWhenMarked(_) => {
                let half = Bytes::copy_from_slice(&input[..input.len() / 2]);
                tokio::fs::write(job.output(), &half).await.map_err(|err| {
                    CompressionFailure::resource("write_output", Some(job.output().to_path_buf()), err)
                })?;
                Ok(ToolOutput::Optimized(half))
            }
        }
    }
}

#[async_trait]
impl Compressor for ScriptedCompressor {
    async fn compress(&self, job: &CompressionJob) -> CompressionResult<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let result = self.run(job).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn availability(&self) -> CompressionResult<ToolInfo> {
        if self.available.load(Ordering::SeqCst) {
            Ok(ToolInfo {
                path: PathBuf::from("/usr/bin/pngquant"),
                version: "2.18.0".to_string(),
            })
        } else {
            Err(CompressionFailure::ToolUnavailable {
                tool: PathBuf::from("/usr/bin/pngquant"),
                reason: "not_found",
                source: None,
            })
        }
    }
}

fn failure(kind: FailureKind, job: &CompressionJob) -> CompressionFailure {
    match kind {
        FailureKind::Timeout => CompressionFailure::Timeout {
            timeout: job.settings().timeout,
        },
        FailureKind::ToolContract => CompressionFailure::ToolContract {
            output: job.output().to_path_buf(),
            detail: "output file is empty",
        },
        FailureKind::QualityNotMet => CompressionFailure::Compression {
            cause: ToolFailureCause::QualityNotMet,
            exit_code: Some(99),
            diagnostic: "quality too low".to_string(),
        },
        FailureKind::InputRejected => CompressionFailure::Compression {
            cause: ToolFailureCause::InputRejected,
            exit_code: Some(25),
            diagnostic: "libpng error: IDAT: CRC error".to_string(),
        },
        FailureKind::ToolUnavailable => CompressionFailure::ToolUnavailable {
            tool: PathBuf::from("pngquant"),
            reason: "permission_denied",
            source: None,
        },
        FailureKind::Resource => CompressionFailure::resource(
            "spawn_tool",
            None,
            std::io::Error::other("fork failed"),
        ),
        FailureKind::Validation | FailureKind::Compression | FailureKind::Overload => {
            CompressionFailure::Compression {
                cause: ToolFailureCause::Failed,
                exit_code: Some(1),
                diagnostic: "error: out of memory".to_string(),
            }
        }
    }
}

pub(crate) fn settings() -> CompressionSettings {
    CompressionSettings {
        quality: QualityRange::new(65, 80).expect("valid quality range"),
        speed: 4,
        policy: QualityPolicy::BestEffort,
        timeout: Duration::from_secs(5),
    }
}

pub(crate) fn png_bytes(len: usize) -> Bytes {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(&[0, 0, 0, 13]);
    data.extend_from_slice(b"IHDR");
    data.resize(len.max(data.len()), 0);
    Bytes::from(data)
}

pub(crate) fn marked_png(len: usize) -> Bytes {
    let mut data = png_bytes(len).to_vec();
    if let Some(last) = data.last_mut() {
        *last = MARK;
    }
    Bytes::from(data)
}

pub(crate) fn queue_gate(capacity: usize) -> ConcurrencyGate {
    ConcurrencyGate::new(
        capacity,
        AdmissionPolicy::QueueWithDeadline(Duration::from_secs(5)),
    )
}

/// Pipeline wired to a scripted compressor and a private temp root.
pub(crate) struct Harness {
    pub(crate) pipeline: RequestPipeline,
    pub(crate) compressor: Arc<ScriptedCompressor>,
    pub(crate) metrics: Metrics,
    pub(crate) root: TempRoot,
    _dir: TempDir,
}

impl Harness {
    pub(crate) fn new(compressor: ScriptedCompressor, gate: ConcurrencyGate) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let root = TempRoot::prepare(dir.path().join("scopes"), Duration::from_secs(3_600))?;
        let compressor = Arc::new(compressor);
        let metrics = Metrics::new()?;
        let pipeline = RequestPipeline::new(PipelineParts {
            limits: LIMITS,
            settings: settings(),
            temp_root: root.clone(),
            gate,
            compressor: Arc::clone(&compressor) as Arc<dyn Compressor>,
            metrics: metrics.clone(),
        });
        Ok(Self {
            pipeline,
            compressor,
            metrics,
            root,
            _dir: dir,
        })
    }

    pub(crate) fn scripted(script: Script) -> anyhow::Result<Self> {
        Self::new(ScriptedCompressor::new(script, Duration::ZERO), queue_gate(2))
    }

    /// Entries currently present under the temp root.
    pub(crate) fn leftovers(&self) -> anyhow::Result<usize> {
        Ok(std::fs::read_dir(self.root.path())?.count())
    }
}
