use crate::BootloaderKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EspError {
    #[error("required tool {tool} not found at {}", path.display())]
    Environment { tool: String, path: PathBuf },

    #[error("listing partitions failed: {cause}")]
    Enumeration { cause: String },

    #[error("no EFI partition found")]
    NoEfiPartition,

    #[error("querying partition {partition} failed: {cause}")]
    InfoQuery { partition: String, cause: String },

    #[error("partition {partition} was not mounted after {attempts} attempts")]
    MountTimeout { partition: String, attempts: u32 },

    #[error("EFI partition at {} is mounted read-only", mount_point.display())]
    ReadOnlyPartition { mount_point: PathBuf },

    #[error("EFI partition at {} holds {kind}, refusing to update", mount_point.display())]
    BootloaderMismatch {
        mount_point: PathBuf,
        kind: BootloaderKind,
    },

    #[error("backup to {} failed: {source}", destination.display())]
    Backup {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("updating {} failed: {cause}", target.display())]
    Update { target: PathBuf, cause: String },

    #[error("invalid bootloader source {}: {cause}", path.display())]
    InvalidSource { path: PathBuf, cause: String },
}

impl EspError {
    /// Message key handed to the presentation sink.
    pub fn key(&self) -> &'static str {
        match self {
            EspError::Environment { .. } => "error_missing_dependency",
            EspError::Enumeration { .. } => "error_list_partitions",
            EspError::NoEfiPartition => "error_no_efi_partition",
            EspError::InfoQuery { .. } => "error_getting_efi_info",
            EspError::MountTimeout { .. } => "mount_timeout",
            EspError::ReadOnlyPartition { .. } => "read_only_error",
            EspError::BootloaderMismatch { kind, .. } => match kind {
                BootloaderKind::OpenCore => "not_clover_abort",
                BootloaderKind::Windows => "windows_bootmgr_detected",
                _ => "unknown_bootloader",
            },
            EspError::Backup { .. } => "error_creating_backup",
            EspError::Update { .. } => "error_updating_clover",
            EspError::InvalidSource { .. } => "error_invalid_source",
        }
    }

    /// Gate failures end the process; the value is its exit status.
    pub fn exit_code(&self) -> u8 {
        match self {
            EspError::Environment { .. } => 3,
            EspError::Enumeration { .. } | EspError::NoEfiPartition => 4,
            EspError::InfoQuery { .. } | EspError::MountTimeout { .. } => 5,
            EspError::ReadOnlyPartition { .. } => 6,
            EspError::BootloaderMismatch { .. } => 1,
            EspError::Backup { .. } => 7,
            EspError::Update { .. } => 8,
            EspError::InvalidSource { .. } => 9,
        }
    }

    pub fn update(target: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        EspError::Update {
            target: target.into(),
            cause: cause.to_string(),
        }
    }

    pub fn backup(destination: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EspError::Backup {
            destination: destination.into(),
            source,
        }
    }
}
