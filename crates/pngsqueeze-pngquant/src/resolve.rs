//! Locating the `pngquant` executable and probing its version.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use pngsqueeze_core::{CompressionFailure, CompressionResult};
use tokio::process::Command;
use tokio::time::timeout;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve `binary` to an executable path.
///
/// Bare names are searched on `PATH`; anything containing a separator is checked as is.
pub(crate) fn resolve_binary(binary: &Path) -> CompressionResult<PathBuf> {
    resolve_in(binary, std::env::var_os("PATH"))
}

fn resolve_in(binary: &Path, search_path: Option<OsString>) -> CompressionResult<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return check_executable(binary).map(|()| binary.to_path_buf());
    }

    let mut last_failure = None;
    for dir in search_path
        .as_deref()
        .map(std::env::split_paths)
        .into_iter()
        .flatten()
    {
        let candidate = dir.join(binary);
        match check_executable(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(failure) => last_failure = Some(failure),
        }
    }

    Err(match last_failure {
        Some(CompressionFailure::ToolUnavailable {
            reason: "not_executable",
            ..
        }) => unavailable(binary, "not_executable", None),
        _ => unavailable(binary, "not_found", None),
    })
}

fn check_executable(path: &Path) -> CompressionResult<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(unavailable(path, "not_found", Some(err)));
        }
        Err(err) => return Err(unavailable(path, "unreadable", Some(err))),
    };
    if !metadata.is_file() {
        return Err(unavailable(path, "not_a_file", None));
    }
    if !is_executable(&metadata) {
        return Err(unavailable(path, "not_executable", None));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Run `<binary> --version` and return its trimmed output.
pub(crate) async fn probe_version(binary: &Path) -> CompressionResult<String> {
    let mut command = Command::new(binary);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match timeout(VERSION_PROBE_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(spawn_failure(binary, err)),
        Err(_) => return Err(unavailable(binary, "version_probe_timed_out", None)),
    };
    if !output.status.success() {
        return Err(unavailable(binary, "version_probe_failed", None));
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        return Err(unavailable(binary, "version_probe_empty", None));
    }
    Ok(version)
}

/// Classify a spawn error: a missing or forbidden binary is an availability problem,
/// anything else is a local resource failure.
pub(crate) fn spawn_failure(binary: &Path, err: io::Error) -> CompressionFailure {
    match err.kind() {
        io::ErrorKind::NotFound => unavailable(binary, "not_found", Some(err)),
        io::ErrorKind::PermissionDenied => unavailable(binary, "permission_denied", Some(err)),
        _ => CompressionFailure::resource("spawn_tool", Some(binary.to_path_buf()), err),
    }
}

fn unavailable(tool: &Path, reason: &'static str, source: Option<io::Error>) -> CompressionFailure {
    CompressionFailure::ToolUnavailable {
        tool: tool.to_path_buf(),
        reason,
        source,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn reason(result: CompressionResult<PathBuf>) -> &'static str {
        match result {
            Err(CompressionFailure::ToolUnavailable { reason, .. }) => reason,
            other => panic!("expected tool unavailable, got {other:?}"),
        }
    }

    fn write_file(path: &Path, mode: u32) -> anyhow::Result<()> {
        fs::write(path, "#!/bin/sh\nexit 0\n")?;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(mode);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }

    #[test]
    fn bare_name_is_found_on_search_path() -> anyhow::Result<()> {
        let empty = TempDir::new()?;
        let bin = TempDir::new()?;
        write_file(&bin.path().join("pngquant"), 0o755)?;
        let search = std::env::join_paths([empty.path(), bin.path()])?;

        let resolved = resolve_in(Path::new("pngquant"), Some(search))?;
        assert_eq!(resolved, bin.path().join("pngquant"));
        Ok(())
    }

    #[test]
    fn missing_and_non_executable_are_distinguished() -> anyhow::Result<()> {
        let bin = TempDir::new()?;
        assert_eq!(
            reason(resolve_in(
                Path::new("pngquant"),
                Some(bin.path().as_os_str().to_owned())
            )),
            "not_found"
        );
        assert_eq!(reason(resolve_in(Path::new("pngquant"), None)), "not_found");

        let plain = bin.path().join("pngquant");
        write_file(&plain, 0o644)?;
        assert_eq!(
            reason(resolve_in(
                Path::new("pngquant"),
                Some(bin.path().as_os_str().to_owned())
            )),
            "not_executable"
        );
        assert_eq!(reason(resolve_in(&plain, None)), "not_executable");
        assert_eq!(reason(resolve_in(bin.path(), None)), "not_a_file");
        Ok(())
    }

    #[test]
    fn spawn_errors_are_classified() {
        let missing = spawn_failure(
            Path::new("pngquant"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(missing.kind(), pngsqueeze_core::FailureKind::ToolUnavailable);
        let other = spawn_failure(Path::new("pngquant"), io::Error::other("fork failed"));
        assert_eq!(other.kind(), pngsqueeze_core::FailureKind::Resource);
    }
}
