use anyhow::{anyhow, Context, Result};
use cloverup_core::{EspError, Settings};
use std::path::{Path, PathBuf};

pub mod catalog;
pub mod resolver;

pub use catalog::PartitionCatalog;
pub use resolver::{MountPointField, MountResolver};

/// Disk enumeration collaborator (`diskutil list` / `diskutil info`).
pub trait DiskService {
    fn list_partitions(&self) -> Result<Vec<String>>;
    fn partition_info(&self, id: &str) -> Result<String>;
}

/// Mount-table collaborator (`mount`).
pub trait MountTable {
    fn current_mounts(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct Diskutil {
    path: PathBuf,
}

impl Diskutil {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DiskService for Diskutil {
    fn list_partitions(&self) -> Result<Vec<String>> {
        let stdout = run_cmd(&self.path, &["list"])?;
        Ok(stdout.lines().map(str::to_string).collect())
    }

    fn partition_info(&self, id: &str) -> Result<String> {
        run_cmd(&self.path, &["info", id])
    }
}

#[derive(Debug, Clone)]
pub struct MountCommand {
    path: PathBuf,
}

impl MountCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MountTable for MountCommand {
    fn current_mounts(&self) -> Result<Vec<String>> {
        let stdout = run_cmd(&self.path, &[])?;
        Ok(stdout.lines().map(str::to_string).collect())
    }
}

/// Fails when a disk tool the pipeline shells out to is missing.
pub fn check_environment(settings: &Settings) -> Result<(), EspError> {
    for (tool, path) in [
        ("diskutil", &settings.diskutil_path),
        ("mount", &settings.mount_path),
    ] {
        if !path.is_file() {
            log::error!("event=missing_dependency tool={} path={}", tool, path.display());
            return Err(EspError::Environment {
                tool: tool.to_string(),
                path: path.clone(),
            });
        }
    }
    if !cfg!(target_os = "macos") {
        log::warn!("event=unsupported_host os={}", std::env::consts::OS);
    }
    Ok(())
}

fn run_cmd(cmd: &Path, args: &[&str]) -> Result<String> {
    let output = std::process::Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("run {}", cmd.display()))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(anyhow!(
            "{} failed ({}): {}",
            cmd.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_an_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            diskutil_path: dir.path().join("diskutil"),
            ..Settings::default()
        };
        let err = check_environment(&settings).unwrap_err();
        assert!(matches!(err, EspError::Environment { ref tool, .. } if tool == "diskutil"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_reports_status() {
        let err = run_cmd(Path::new("/bin/sh"), &["-c", "echo nope >&2; exit 3"]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[cfg(unix)]
    #[test]
    fn command_stdout_is_returned() {
        let out = run_cmd(Path::new("/bin/sh"), &["-c", "echo hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }
}
