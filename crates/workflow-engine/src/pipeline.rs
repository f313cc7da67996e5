use crate::prompt::Prompt;
use cloverup_backup::BackupEngine;
use cloverup_bootloader_core::detect;
use cloverup_core::{BackupSnapshot, BootloaderKind, EspError, Partition, Settings};
use cloverup_host_macos::{DiskService, MountResolver, MountTable, PartitionCatalog};
use cloverup_safety::require_clover;
use log::info;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// A partition that passed every gate up to the bootloader check.
#[derive(Debug, Clone)]
pub struct ValidatedEsp {
    pub partition: Partition,
    pub mount_point: PathBuf,
    pub kind: BootloaderKind,
}

/// A validated partition with its backup taken; safe to hand to the menu.
#[derive(Debug, Clone)]
pub struct PreparedEsp {
    pub partition: Partition,
    pub mount_point: PathBuf,
    pub kind: BootloaderKind,
    pub snapshot: BackupSnapshot,
}

#[derive(Debug)]
pub enum Selection<T> {
    Ready(T),
    Exit,
}

pub struct EspPipeline<'a, D: DiskService, M: MountTable> {
    disks: &'a D,
    resolver: MountResolver<'a, D, M>,
    marker: String,
}

impl<'a, D: DiskService, M: MountTable> EspPipeline<'a, D, M> {
    pub fn new(disks: &'a D, mounts: &'a M, settings: &Settings) -> Self {
        Self {
            disks,
            resolver: MountResolver::new(disks, mounts, settings),
            marker: settings.esp_marker.clone(),
        }
    }

    pub fn resolver(&self) -> &MountResolver<'a, D, M> {
        &self.resolver
    }

    /// Catalog, operator choice, mount wait, read-only gate, bootloader gate.
    /// Nothing on the partition is written.
    pub fn select<R: BufRead, W: Write>(
        &self,
        prompt: &mut Prompt<R, W>,
    ) -> Result<Selection<ValidatedEsp>, EspError> {
        let candidates = PartitionCatalog::new(self.disks, self.marker.as_str()).list_candidates()?;
        let Some(index) = prompt.choose_partition(&candidates) else {
            return Ok(Selection::Exit);
        };
        let mut partition = candidates[index].clone();

        let mount_point = self.resolver.resolve(&mut partition)?;
        info!("event=efi_dir_after_mount efi_dir={}", mount_point.display());
        self.resolver.ensure_writable(&mount_point)?;

        let kind = detect(&mount_point);
        require_clover(&mount_point, kind)?;

        Ok(Selection::Ready(ValidatedEsp {
            partition,
            mount_point,
            kind,
        }))
    }

    /// [`select`](Self::select) followed by a full backup of the partition.
    pub fn prepare<R: BufRead, W: Write>(
        &self,
        prompt: &mut Prompt<R, W>,
        backup: &BackupEngine,
    ) -> Result<Selection<PreparedEsp>, EspError> {
        let esp = match self.select(prompt)? {
            Selection::Ready(esp) => esp,
            Selection::Exit => return Ok(Selection::Exit),
        };
        let snapshot = backup.snapshot(&esp.partition.id, &esp.mount_point)?;
        Ok(Selection::Ready(PreparedEsp {
            partition: esp.partition,
            mount_point: esp.mount_point,
            kind: esp.kind,
            snapshot,
        }))
    }
}
