use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backup_base_dir: PathBuf,
    pub log_dir: PathBuf,
    pub esp_marker: String,
    pub read_only_marker: String,
    pub mount_poll_interval_secs: u64,
    /// Zero waits forever.
    pub mount_max_attempts: u32,
    pub diskutil_path: PathBuf,
    pub mount_path: PathBuf,
    pub aux_driver_path: PathBuf,
    pub min_free_space_margin_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_base_dir: home_dir(),
            log_dir: PathBuf::from("."),
            esp_marker: "EFI".to_string(),
            read_only_marker: "read-only".to_string(),
            mount_poll_interval_secs: 5,
            mount_max_attempts: 60,
            diskutil_path: PathBuf::from("/usr/sbin/diskutil"),
            mount_path: PathBuf::from("/sbin/mount"),
            aux_driver_path: PathBuf::from("Drivers/HfsPlus.efi"),
            min_free_space_margin_bytes: 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&data)
            .with_context(|| format!("parse settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_secs(self.mount_poll_interval_secs)
    }

    pub fn backup_store(&self) -> PathBuf {
        self.backup_base_dir.join(crate::BACKUP_STORE_DIR)
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloverup.json");
        std::fs::write(&path, r#"{ "mount_max_attempts": 3, "log_dir": "/var/log" }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.mount_max_attempts, 3);
        assert_eq!(settings.log_dir, PathBuf::from("/var/log"));
        assert_eq!(settings.esp_marker, "EFI");
        assert_eq!(settings.mount_poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloverup.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
