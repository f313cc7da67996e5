use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

mod error;
mod settings;

pub use error::EspError;
pub use settings::Settings;

/// Directory created under the backup base that holds every snapshot.
pub const BACKUP_STORE_DIR: &str = "EFI_BACKUPS";
pub const BACKUP_DIR_PREFIX: &str = "EFI-Backup-";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: String,                 // device/volume name, e.g. "disk0s1"
    pub descriptor: String,         // raw enumeration line
    pub mount_point: Option<PathBuf>,
}

impl Partition {
    pub fn new(id: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            descriptor: descriptor.into(),
            mount_point: None,
        }
    }
}

/// Point-in-time view of a mount. Never cached: callers recompute it before
/// every mutating step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountState {
    pub mounted: bool,
    pub path: PathBuf,
    pub writable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootloaderKind {
    Clover,
    OpenCore,
    Windows,
    Unknown,
}

impl BootloaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootloaderKind::Clover => "Clover",
            BootloaderKind::OpenCore => "OpenCore",
            BootloaderKind::Windows => "Windows",
            BootloaderKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BootloaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupSnapshot {
    pub source_partition_id: String,
    pub created_at: String,
    pub destination: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UpdateTarget {
    pub source_root: PathBuf,      // extracted distribution, contains EFI/CLOVER
    pub aux_driver_root: PathBuf,  // independent package holding the auxiliary driver
    pub efi_root: PathBuf,         // mounted ESP
}

pub fn now_utc_rfc3339() -> String {
    format_rfc3339_utc(OffsetDateTime::now_utc())
}

pub fn format_rfc3339_utc(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Local time when the offset can be determined, UTC otherwise.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Compact local timestamp used in backup directory and log file names.
pub fn compact_timestamp() -> String {
    format_compact(local_now())
}

pub fn format_compact(at: OffsetDateTime) -> String {
    at.format(format_description!("[year][month][day][hour][minute][second]"))
        .unwrap_or_else(|_| "19700101000000".to_string())
}

/// Human-readable local timestamp for console and log lines.
pub fn display_timestamp() -> String {
    local_now().format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| "1970-01-01 00:00:00".to_string())
}
