use crate::{DiskService, MountTable};
use cloverup_core::{EspError, MountState, Partition, Settings};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPointField {
    Mounted(PathBuf),
    Empty,
    Absent,
}

pub struct MountResolver<'a, D: DiskService, M: MountTable> {
    disks: &'a D,
    mounts: &'a M,
    read_only_marker: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl<'a, D: DiskService, M: MountTable> MountResolver<'a, D, M> {
    pub fn new(disks: &'a D, mounts: &'a M, settings: &Settings) -> Self {
        Self {
            disks,
            mounts,
            read_only_marker: settings.read_only_marker.clone(),
            poll_interval: settings.mount_poll_interval(),
            max_attempts: settings.mount_max_attempts,
        }
    }

    /// Polls partition info until a mount point shows up, then records it on
    /// the partition. `max_attempts == 0` polls until interrupted.
    pub fn resolve(&self, partition: &mut Partition) -> Result<PathBuf, EspError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let info = self.disks.partition_info(&partition.id).map_err(|err| {
                error!(
                    "event=error_getting_efi_info partition={} cause={:#}",
                    partition.id, err
                );
                EspError::InfoQuery {
                    partition: partition.id.clone(),
                    cause: format!("{:#}", err),
                }
            })?;

            match parse_mount_point(&info) {
                MountPointField::Mounted(path) => {
                    info!(
                        "event=mount_point partition={} mount_point={}",
                        partition.id,
                        path.display()
                    );
                    partition.mount_point = Some(path.clone());
                    return Ok(path);
                }
                MountPointField::Empty => {
                    warn!("event=mount_wait partition={} attempt={}", partition.id, attempts);
                    warn!("event=press_ctrl_c_to_exit");
                }
                MountPointField::Absent => {
                    warn!("event=mount_error partition={} attempt={}", partition.id, attempts);
                }
            }

            if self.max_attempts != 0 && attempts >= self.max_attempts {
                error!(
                    "event=mount_timeout partition={} attempts={}",
                    partition.id, attempts
                );
                return Err(EspError::MountTimeout {
                    partition: partition.id.clone(),
                    attempts,
                });
            }
            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }
    }

    /// Read-only unless the mount table positively says otherwise.
    pub fn is_read_only(&self, mount_point: &Path) -> bool {
        info!("event=checking_efi_read_only mount_point={}", mount_point.display());
        let lines = match self.mounts.current_mounts() {
            Ok(lines) => lines,
            Err(err) => {
                error!(
                    "event=error_getting_efi_info mount_point={} cause={:#}",
                    mount_point.display(),
                    err
                );
                return true;
            }
        };
        if mount_table_marks_read_only(&lines, mount_point, &self.read_only_marker) {
            error!("event=read_only_error mount_point={}", mount_point.display());
            true
        } else {
            info!("event=efi_read_write mount_point={}", mount_point.display());
            false
        }
    }

    pub fn mount_state(&self, mount_point: &Path) -> MountState {
        let mounted = mount_point.is_dir();
        MountState {
            mounted,
            path: mount_point.to_path_buf(),
            writable: mounted && !self.is_read_only(mount_point),
        }
    }

    /// Fatal form of the writability check used by the initial gate.
    pub fn ensure_writable(&self, mount_point: &Path) -> Result<(), EspError> {
        if self.is_read_only(mount_point) {
            return Err(EspError::ReadOnlyPartition {
                mount_point: mount_point.to_path_buf(),
            });
        }
        Ok(())
    }
}

pub fn parse_mount_point(info: &str) -> MountPointField {
    let Some(line) = info.lines().find(|line| line.contains("Mount Point")) else {
        return MountPointField::Absent;
    };
    let value = line.splitn(2, ':').nth(1).unwrap_or("").trim();
    if value.is_empty() {
        MountPointField::Empty
    } else {
        MountPointField::Mounted(PathBuf::from(value))
    }
}

pub fn mount_table_marks_read_only(lines: &[String], mount_point: &Path, marker: &str) -> bool {
    let mount = mount_point.to_string_lossy();
    lines
        .iter()
        .any(|line| line.contains(mount.as_ref()) && line.contains(marker))
}
