//! Subprocess invocation for one compression job.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use pngsqueeze_core::{
    CompressionFailure, CompressionJob, CompressionResult, Compressor, ToolInfo, ToolOutput,
};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::args::build_args;
use crate::exit::{ExitClass, classify};
use crate::resolve::{probe_version, resolve_binary, spawn_failure};

const DIAGNOSTIC_CAP: usize = 16 * 1024;
const DIAGNOSTIC_GRACE: Duration = Duration::from_secs(1);

/// [`Compressor`] backed by the `pngquant` command-line tool.
#[derive(Debug, Clone)]
pub struct PngquantCompressor {
    configured: PathBuf,
    binary: PathBuf,
    version: String,
}

impl PngquantCompressor {
    /// Resolve `binary` and confirm it answers `--version`.
    ///
    /// # Errors
    ///
    /// Returns [`CompressionFailure::ToolUnavailable`] when the binary is missing, not
    /// executable, or its version probe fails.
    pub async fn locate(binary: impl Into<PathBuf>) -> CompressionResult<Self> {
        let configured = binary.into();
        let resolved = resolve_binary(&configured)?;
        let version = probe_version(&resolved).await?;
        debug!(binary = %resolved.display(), version = %version, "located pngquant");
        Ok(Self {
            configured,
            binary: resolved,
            version,
        })
    }

    /// Resolved executable path.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Version reported at startup.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl Compressor for PngquantCompressor {
    async fn compress(&self, job: &CompressionJob) -> CompressionResult<ToolOutput> {
        let settings = job.settings();
        let mut command = Command::new(&self.binary);
        command
            .args(build_args(settings, job.input(), job.output()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|err| spawn_failure(&self.binary, err))?;
        debug!(job_id = %job.id(), pid = child.id(), "spawned pngquant");

        let mut capture = tokio::spawn(capture_diagnostic(child.stderr.take()));
        let status = match timeout(settings.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                capture.abort();
                terminate(&mut child, job).await;
                return Err(CompressionFailure::resource(
                    "wait_tool",
                    Some(self.binary.clone()),
                    err,
                ));
            }
            Err(_) => {
                capture.abort();
                terminate(&mut child, job).await;
                return Err(CompressionFailure::Timeout {
                    timeout: settings.timeout,
                });
            }
        };
        let diagnostic = collect_diagnostic(&mut capture).await;
        debug!(
            job_id = %job.id(),
            exit_code = status.code(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "pngquant exited"
        );

        match classify(status.code()) {
            ExitClass::Success => read_output(job.output()).await.map(ToolOutput::Optimized),
            ExitClass::NotSmaller => Ok(ToolOutput::NotSmaller),
            ExitClass::Failed(cause) => Err(CompressionFailure::Compression {
                cause,
                exit_code: status.code(),
                diagnostic,
            }),
        }
    }

    fn availability(&self) -> CompressionResult<ToolInfo> {
        let binary = resolve_binary(&self.configured)?;
        Ok(ToolInfo {
            path: binary,
            version: self.version.clone(),
        })
    }
}

/// Kill the child and reap it so no process outlives the job.
async fn terminate(child: &mut Child, job: &CompressionJob) {
    let pid = child.id();
    if let Err(err) = child.start_kill() {
        warn!(job_id = %job.id(), pid, error = %err, "failed to signal pngquant");
    }
    match child.wait().await {
        Ok(status) => debug!(job_id = %job.id(), pid, ?status, "reaped pngquant"),
        Err(err) => warn!(job_id = %job.id(), pid, error = %err, "failed to reap pngquant"),
    }
}

/// Read stderr to completion, keeping at most [`DIAGNOSTIC_CAP`] bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
/// Await the stderr reader for at most [`DIAGNOSTIC_GRACE`] after exit. A descendant
/// still holding the pipe open must not keep the reader alive, so it is aborted.
async fn collect_diagnostic(capture: &mut JoinHandle<String>) -> String {
    match timeout(DIAGNOSTIC_GRACE, &mut *capture).await {
        Ok(Ok(diagnostic)) => diagnostic,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            capture.abort();
            String::new()
        }
    }
}

async fn capture_diagnostic(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                let room = DIAGNOSTIC_CAP.saturating_sub(captured.len());
                captured.extend_from_slice(&chunk[..read.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&captured).trim().to_string()
}

async fn read_output(path: &Path) -> CompressionResult<Bytes> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Err(CompressionFailure::ToolContract {
            output: path.to_path_buf(),
            detail: "output file is empty",
        }),
        Ok(bytes) => Ok(Bytes::from(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(CompressionFailure::ToolContract {
            output: path.to_path_buf(),
            detail: "output file missing",
        }),
        Err(err) => Err(CompressionFailure::resource(
            "read_output",
            Some(path.to_path_buf()),
            err,
        )),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use pngsqueeze_core::{
        CompressionSettings, FailureKind, QualityPolicy, QualityRange, ToolFailureCause,
    };
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use uuid::Uuid;

    const PRELUDE: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "2.18.0 (fake)"
  exit 0
fi
out=""
inp=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --) inp="$2"; shift 2 ;;
    *) shift ;;
  esac
done
"#;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let dir = TempDir::new()?;
            fs::write(dir.path().join("input.png"), b"original png bytes")?;
            Ok(Self { dir })
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn script(&self, body: &str) -> anyhow::Result<PathBuf> {
            let path = self.path("fake-pngquant");
            {
                let mut file = fs::File::create(&path)?;
                file.write_all(PRELUDE.as_bytes())?;
                file.write_all(body.as_bytes())?;
                file.write_all(b"\n")?;
                file.sync_all()?;
            }
            let mut permissions = fs::metadata(&path)?.permissions();
            permissions.set_mode(0o755);
            fs::set_permissions(&path, permissions)?;
            Ok(path)
        }

        fn job(&self, policy: QualityPolicy, timeout: Duration) -> CompressionJob {
            CompressionJob::new(
                Uuid::new_v4(),
                self.path("input.png"),
                self.path("output.png"),
                18,
                CompressionSettings {
                    quality: QualityRange::new(60, 80).expect("valid range"),
                    speed: 4,
                    policy,
                    timeout,
                },
            )
        }
    }

    async fn run(
        fixture: &Fixture,
        body: &str,
        policy: QualityPolicy,
        timeout: Duration,
    ) -> anyhow::Result<CompressionResult<ToolOutput>> {
        let binary = fixture.script(body)?;
        let compressor = PngquantCompressor::locate(&binary).await?;
        Ok(compressor.compress(&fixture.job(policy, timeout)).await)
    }

    #[tokio::test]
    async fn locate_reports_version_and_availability() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let binary = fixture.script("exit 0")?;
        let compressor = PngquantCompressor::locate(&binary).await?;
        assert_eq!(compressor.version(), "2.18.0 (fake)");
        assert_eq!(compressor.binary(), binary.as_path());

        let info = compressor.availability()?;
        assert_eq!(info.path, binary);

        fs::remove_file(&binary)?;
        let err = compressor.availability().expect_err("removed binary is unavailable");
        assert_eq!(err.kind(), FailureKind::ToolUnavailable);
        Ok(())
    }

    #[tokio::test]
    async fn locate_fails_for_missing_binary() {
        let err = PngquantCompressor::locate("/nonexistent/pngsqueeze/pngquant")
            .await
            .expect_err("missing binary must not resolve");
        assert_eq!(err.kind(), FailureKind::ToolUnavailable);
    }

    #[tokio::test]
    async fn success_returns_output_and_passes_expected_arguments() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let args_file = fixture.path("args.txt");
        let body = format!(
            "printf '%s\\n' \"$inp\" > '{}'\nprintf 'tiny' > \"$out\"",
            args_file.display()
        );
        let outcome = run(
            &fixture,
            &body,
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        match outcome {
            Ok(ToolOutput::Optimized(bytes)) => assert_eq!(bytes.as_ref(), b"tiny"),
            other => panic!("expected optimized output, got {other:?}"),
        }
        let recorded = fs::read_to_string(&args_file)?;
        assert_eq!(recorded.trim(), fixture.path("input.png").display().to_string());
        assert_eq!(fs::read(fixture.path("input.png"))?, b"original png bytes");
        Ok(())
    }

    #[tokio::test]
    async fn exit_98_means_not_smaller() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = run(
            &fixture,
            "exit 98",
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        assert!(matches!(outcome, Ok(ToolOutput::NotSmaller)));
        Ok(())
    }

    #[tokio::test]
    async fn strict_quality_failure_is_classified() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = run(
            &fixture,
            "echo 'quality too low' >&2\nexit 99",
            QualityPolicy::Strict,
            Duration::from_secs(10),
        )
        .await?;
        match outcome {
            Err(CompressionFailure::Compression {
                cause,
                exit_code,
                diagnostic,
            }) => {
                assert_eq!(cause, ToolFailureCause::QualityNotMet);
                assert_eq!(exit_code, Some(99));
                assert_eq!(diagnostic, "quality too low");
            }
            other => panic!("expected quality failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn decode_errors_are_input_rejections() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let outcome = run(
            &fixture,
            "echo 'not a PNG file' >&2\nexit 25",
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        let err = outcome.expect_err("exit 25 must fail");
        assert_eq!(err.kind(), FailureKind::InputRejected);
        Ok(())
    }

    #[tokio::test]
    async fn diagnostic_is_capped_and_pipe_is_drained() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let body = "i=0\nwhile [ $i -lt 4096 ]; do\n  echo 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx' >&2\n  i=$((i+1))\ndone\nexit 1";
        let outcome = run(
            &fixture,
            body,
            QualityPolicy::BestEffort,
            Duration::from_secs(20),
        )
        .await?;
        match outcome {
            Err(CompressionFailure::Compression {
                cause, diagnostic, ..
            }) => {
                assert_eq!(cause, ToolFailureCause::Failed);
                assert!(diagnostic.len() <= DIAGNOSTIC_CAP);
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected compression failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn zero_exit_without_output_is_a_contract_violation() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let missing = run(
            &fixture,
            "exit 0",
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        assert_eq!(
            missing.expect_err("missing output").kind(),
            FailureKind::ToolContract
        );

        let empty = run(
            &fixture,
            ": > \"$out\"\nexit 0",
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        assert_eq!(
            empty.expect_err("empty output").kind(),
            FailureKind::ToolContract
        );
        Ok(())
    }

    #[tokio::test]
    async fn timeout_kills_and_reaps_the_child() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let pid_file = fixture.path("pid");
        let body = format!("echo $$ > '{}'\nexec sleep 30", pid_file.display());
        let outcome = run(
            &fixture,
            &body,
            QualityPolicy::BestEffort,
            Duration::from_millis(500),
        )
        .await?;
        assert_eq!(
            outcome.expect_err("hung tool must time out").kind(),
            FailureKind::Timeout
        );

        let pid: i32 = fs::read_to_string(&pid_file)?.trim().parse()?;
        assert_eq!(kill(Pid::from_raw(pid), None::<Signal>), Err(Errno::ESRCH));
        Ok(())
    }

    #[tokio::test]
    async fn stalled_diagnostic_reader_is_aborted() {
        let mut capture = tokio::spawn(std::future::pending::<String>());
        assert_eq!(collect_diagnostic(&mut capture).await, "");
        let err = capture.await.expect_err("reader must not outlive the grace period");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn descendant_holding_stderr_does_not_stall_the_job() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let pid_file = fixture.path("straggler");
        let body = format!(
            "sleep 30 &\necho $! > '{}'\necho boom >&2\nexit 1",
            pid_file.display()
        );
        let started = Instant::now();
        let outcome = run(
            &fixture,
            &body,
            QualityPolicy::BestEffort,
            Duration::from_secs(10),
        )
        .await?;
        let elapsed = started.elapsed();

        let straggler: i32 = fs::read_to_string(&pid_file)?.trim().parse()?;
        let _ = kill(Pid::from_raw(straggler), Signal::SIGKILL);
        assert_eq!(
            outcome.expect_err("non-zero exit").kind(),
            FailureKind::Compression
        );
        assert!(elapsed < DIAGNOSTIC_GRACE + Duration::from_secs(3), "{elapsed:?}");
        Ok(())
    }
}
