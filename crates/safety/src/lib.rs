use cloverup_core::{BootloaderKind, EspError, MountState};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny(String),
}

/// Only a tree already occupied by Clover may be backed up and overwritten.
pub fn can_update_bootloader(kind: BootloaderKind) -> SafetyDecision {
    match kind {
        BootloaderKind::Clover => SafetyDecision::Allow,
        BootloaderKind::OpenCore => {
            SafetyDecision::Deny("Denied: OpenCore occupies the EFI partition".to_string())
        }
        BootloaderKind::Windows => {
            SafetyDecision::Deny("Denied: Windows Boot Manager occupies the EFI partition".to_string())
        }
        BootloaderKind::Unknown => {
            SafetyDecision::Deny("Denied: unrecognized EFI partition contents".to_string())
        }
    }
}

pub fn can_write_to_partition(state: &MountState) -> SafetyDecision {
    if !state.mounted {
        return SafetyDecision::Deny(format!("Denied: {} is not mounted", state.path.display()));
    }
    if !state.writable {
        return SafetyDecision::Deny(format!("Denied: {} is read-only", state.path.display()));
    }
    SafetyDecision::Allow
}

/// Turns a denied bootloader gate into the pipeline error.
pub fn require_clover(mount_point: &Path, kind: BootloaderKind) -> Result<(), EspError> {
    match can_update_bootloader(kind) {
        SafetyDecision::Allow => Ok(()),
        SafetyDecision::Deny(_) => Err(EspError::BootloaderMismatch {
            mount_point: mount_point.to_path_buf(),
            kind,
        }),
    }
}
