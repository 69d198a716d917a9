//! Request-scoped temporary files for pngsqueeze.
//!
//! Every compression job gets its own directory under a shared root. The directory,
//! its staged input, and the tool's output are removed when the owning
//! [`ScopedPath`] is released or dropped, whichever happens first.
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

pub mod error;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::{TempFsError, TempFsResult};

const SCOPE_PREFIX: &str = "job-";
const INPUT_FILE: &str = "input.png";
const OUTPUT_FILE: &str = "output.png";
const STAGE_ATTEMPTS: usize = 2;

/// Root directory under which job scopes are created.
#[derive(Debug, Clone)]
pub struct TempRoot {
    root: Arc<PathBuf>,
}

impl TempRoot {
    /// Create the root if needed, verify it is writable, and remove scopes left behind
    /// by earlier processes.
    ///
    /// Only scopes untouched for at least `stale_after` are removed, so a root shared
    /// with another running instance keeps that instance's live jobs. `stale_after`
    /// should exceed the longest a job can hold its scope.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or written.
    pub fn prepare(root: impl Into<PathBuf>, stale_after: Duration) -> TempFsResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| TempFsError::io("create_root", &root, err))?;
        tempfile::Builder::new()
            .prefix(".probe-")
            .tempfile_in(&root)
            .map_err(|err| TempFsError::io("probe_root", &root, err))?;

        let swept = sweep_stale_scopes(&root, stale_after)?;
        if swept > 0 {
            info!(root = %root.display(), swept, "removed stale job directories");
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Root directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Stage `input` into a fresh scope owned by job `id`.
    ///
    /// A failed write is cleaned up and retried once in a new directory.
    ///
    /// # Errors
    ///
    /// Returns an error when both attempts fail or the blocking worker dies.
    pub async fn acquire(&self, id: Uuid, input: Bytes) -> TempFsResult<ScopedPath> {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || stage_with_retry(&root, id, &input, write_input))
            .await
            .map_err(|source| TempFsError::Worker {
                operation: "stage_input",
                source,
            })?
    }
}

fn stage_with_retry<W>(
    root: &Path,
    id: Uuid,
    input: &[u8],
    mut write: W,
) -> TempFsResult<ScopedPath>
where
    W: FnMut(&Path, &[u8]) -> io::Result<()>,
{
    let mut attempt = 1;
    loop {
        match stage(root, id, input, &mut write) {
            Ok(scope) => return Ok(scope),
            Err(err) if attempt < STAGE_ATTEMPTS => {
                warn!(
                    job_id = %id,
                    attempt,
                    operation = err.operation(),
                    error = %err,
                    "staging input failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn stage<W>(root: &Path, id: Uuid, input: &[u8], write: &mut W) -> TempFsResult<ScopedPath>
where
    W: FnMut(&Path, &[u8]) -> io::Result<()>,
{
    let dir = tempfile::Builder::new()
        .prefix(&format!("{SCOPE_PREFIX}{id}-"))
        .tempdir_in(root)
        .map_err(|err| TempFsError::io("create_scope", root, err))?;
    let input_path = dir.path().join(INPUT_FILE);
    let output_path = dir.path().join(OUTPUT_FILE);

    // `dir` drops on the error path and takes the partial file with it.
    write(&input_path, input).map_err(|err| TempFsError::io("write_input", &input_path, err))?;

    debug!(job_id = %id, scope = %dir.path().display(), bytes = input.len(), "staged input");
    Ok(ScopedPath {
        dir: Some(dir),
        input: input_path,
        output: output_path,
        id,
    })
}

fn write_input(path: &Path, input: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(input)?;
    file.sync_all()
}

fn sweep_stale_scopes(root: &Path, stale_after: Duration) -> TempFsResult<usize> {
    let entries = fs::read_dir(root).map_err(|err| TempFsError::io("sweep_root", root, err))?;
    let mut swept = 0;
    for entry in entries {
        let entry = entry.map_err(|err| TempFsError::io("sweep_root", root, err))?;
        let is_scope = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCOPE_PREFIX));
        if !is_scope || !entry.path().is_dir() || !is_stale(&entry, stale_after) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => swept += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(TempFsError::io("sweep_scope", entry.path(), err)),
        }
    }
    Ok(swept)
}

/// A scope whose modification time cannot be read, or lies in the future, is live.
fn is_stale(entry: &fs::DirEntry, stale_after: Duration) -> bool {
    entry
        .metadata()
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after)
}

/// Temporary directory owned by exactly one job.
///
/// Holds `input.png` (written at acquisition) and the reserved `output.png` path the
/// tool writes to. Release is idempotent.
#[derive(Debug)]
pub struct ScopedPath {
    dir: Option<TempDir>,
    input: PathBuf,
    output: PathBuf,
    id: Uuid,
}

impl ScopedPath {
    /// Owning job identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Staged input file.
    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Output path reserved for the tool.
    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Scope directory, or `None` once released.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Remove the scope directory and everything in it.
    ///
    /// Calling this again after a successful release is a no-op, as is releasing a
    /// directory something else already removed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory exists but cannot be removed.
    pub fn release(&mut self) -> TempFsResult<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => {
                debug!(job_id = %self.id, scope = %path.display(), "released scope");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TempFsError::io("release_scope", path, err)),
        }
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(
                job_id = %self.id,
                operation = err.operation(),
                error = %err,
                "failed to release job scope"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STALE_AFTER: Duration = Duration::from_secs(3_600);

    fn entries(path: &Path) -> anyhow::Result<usize> {
        Ok(fs::read_dir(path)?.count())
    }

    /// Writes part of the input, then fails, for the first `failures` calls.
    fn flaky_writer(failures: usize) -> impl FnMut(&Path, &[u8]) -> io::Result<()> {
        let mut calls = 0;
        move |path: &Path, input: &[u8]| {
            calls += 1;
            if calls <= failures {
                fs::write(path, &input[..input.len() / 2])?;
                return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
            }
            write_input(path, input)
        }
    }

    #[tokio::test]
    async fn acquire_stages_input_in_private_directory() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let root = TempRoot::prepare(base.path().join("scopes"), STALE_AFTER)?;
        let id = Uuid::new_v4();

        let scope = root.acquire(id, Bytes::from_static(b"payload")).await?;
        assert_eq!(scope.id(), id);
        assert_eq!(fs::read(scope.input())?, b"payload");
        assert!(!scope.output().exists());
        assert_ne!(scope.input(), scope.output());
        let dir = scope.dir().expect("live scope has a directory");
        assert!(dir.starts_with(root.path()));
        assert!(
            dir.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&format!("job-{id}-")))
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_scopes_never_share_paths() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let root = TempRoot::prepare(base.path(), STALE_AFTER)?;
        let id = Uuid::new_v4();

        let first = root.acquire(id, Bytes::from_static(b"one")).await?;
        let second = root.acquire(id, Bytes::from_static(b"two")).await?;
        assert_ne!(first.dir(), second.dir());
        assert_eq!(fs::read(first.input())?, b"one");
        assert_eq!(fs::read(second.input())?, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn release_is_idempotent_and_drop_cleans_up() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let root = TempRoot::prepare(base.path(), STALE_AFTER)?;

        let mut released = root.acquire(Uuid::new_v4(), Bytes::from_static(b"x")).await?;
        fs::write(released.output(), b"tool output")?;
        released.release()?;
        released.release()?;
        assert!(released.dir().is_none());

        {
            let _dropped = root.acquire(Uuid::new_v4(), Bytes::from_static(b"y")).await?;
            assert_eq!(entries(root.path())?, 1);
        }
        assert_eq!(entries(root.path())?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn release_tolerates_externally_removed_directory() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let root = TempRoot::prepare(base.path(), STALE_AFTER)?;
        let mut scope = root.acquire(Uuid::new_v4(), Bytes::from_static(b"z")).await?;
        let dir = scope.dir().map(Path::to_path_buf).expect("live scope");
        fs::remove_dir_all(&dir)?;
        scope.release()?;
        Ok(())
    }

    #[test]
    fn prepare_sweeps_stale_job_directories_only() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        fs::create_dir(base.path().join("job-stale-abc"))?;
        fs::write(base.path().join("job-stale-abc").join(INPUT_FILE), b"old")?;
        fs::create_dir(base.path().join("unrelated"))?;

        TempRoot::prepare(base.path(), Duration::ZERO)?;
        assert!(!base.path().join("job-stale-abc").exists());
        assert!(base.path().join("unrelated").exists());
        Ok(())
    }

    #[tokio::test]
    async fn prepare_keeps_live_scopes_of_a_sibling_instance() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let running = TempRoot::prepare(base.path(), STALE_AFTER)?;
        let live = running.acquire(Uuid::new_v4(), Bytes::from_static(b"busy")).await?;

        TempRoot::prepare(base.path(), STALE_AFTER)?;
        assert!(live.input().exists());
        assert_eq!(entries(base.path())?, 1);
        Ok(())
    }

    #[test]
    fn failed_first_write_is_cleaned_up_and_retried() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let id = Uuid::new_v4();

        let scope = stage_with_retry(base.path(), id, b"payload", flaky_writer(1))?;
        assert_eq!(fs::read(scope.input())?, b"payload");
        assert_eq!(entries(base.path())?, 1);
        Ok(())
    }

    #[test]
    fn repeated_write_failure_leaves_nothing_behind() -> anyhow::Result<()> {
        let base = TempDir::new()?;

        let err = stage_with_retry(base.path(), Uuid::new_v4(), b"payload", flaky_writer(2))
            .expect_err("both attempts fail");
        assert_eq!(err.operation(), "write_input");
        assert_eq!(entries(base.path())?, 0);
        Ok(())
    }

    #[test]
    fn prepare_fails_when_root_is_a_file() -> anyhow::Result<()> {
        let base = TempDir::new()?;
        let file = base.path().join("occupied");
        fs::write(&file, b"")?;
        let err = TempRoot::prepare(&file, STALE_AFTER).expect_err("file root must be rejected");
        assert_eq!(err.operation(), "create_root");
        Ok(())
    }
}
