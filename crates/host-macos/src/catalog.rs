use crate::DiskService;
use cloverup_core::{EspError, Partition};
use log::{debug, error, info};

pub struct PartitionCatalog<'a, D: DiskService> {
    disks: &'a D,
    marker: String,
}

impl<'a, D: DiskService> PartitionCatalog<'a, D> {
    pub fn new(disks: &'a D, marker: impl Into<String>) -> Self {
        Self {
            disks,
            marker: marker.into(),
        }
    }

    /// Lists partitions whose descriptor carries the ESP marker token.
    pub fn list_candidates(&self) -> Result<Vec<Partition>, EspError> {
        info!("event=locating_efi_partitions");
        let lines = self.disks.list_partitions().map_err(|err| {
            error!("event=error_list_partitions cause={:#}", err);
            EspError::Enumeration {
                cause: format!("{:#}", err),
            }
        })?;

        let candidates = filter_candidates(&lines, &self.marker);
        if candidates.is_empty() {
            error!("event=error_no_efi_partition marker={}", self.marker);
            return Err(EspError::NoEfiPartition);
        }
        for partition in &candidates {
            debug!("event=efi_candidate partition={}", partition.id);
        }
        info!("event=efi_partitions_detected count={}", candidates.len());
        Ok(candidates)
    }
}

pub fn filter_candidates(lines: &[String], marker: &str) -> Vec<Partition> {
    lines
        .iter()
        .filter(|line| line.contains(marker))
        .filter_map(|line| {
            line.split_whitespace()
                .last()
                .map(|id| Partition::new(id, line.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};

    const DISKUTIL_LIST: &str = "\
/dev/disk0 (internal, physical):
   #:                       TYPE NAME                    SIZE       IDENTIFIER
   0:      GUID_partition_scheme                        *500.3 GB   disk0
   1:                        EFI EFI                     209.7 MB   disk0s1
   2:                 Apple_APFS Container disk1         500.1 GB   disk0s2
/dev/disk2 (external, physical):
   0:      GUID_partition_scheme                        *32.0 GB    disk2
   1:                        EFI EFI                     209.7 MB   disk2s1
   2:       Microsoft Basic Data USB                     31.8 GB    disk2s2";

    struct FakeDisks(Result<Vec<String>, String>);

    impl DiskService for FakeDisks {
        fn list_partitions(&self) -> Result<Vec<String>> {
            self.0.clone().map_err(|err| anyhow!(err))
        }

        fn partition_info(&self, _id: &str) -> Result<String> {
            Err(anyhow!("unused"))
        }
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn picks_last_token_of_marker_lines() {
        let found = filter_candidates(&lines(DISKUTIL_LIST), "EFI");
        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["disk0s1", "disk2s1"]);
        assert!(found[0].descriptor.contains("209.7 MB"));
        assert!(found.iter().all(|p| p.mount_point.is_none()));
    }

    #[test]
    fn no_marker_line_is_no_efi_partition() {
        let disks = FakeDisks(Ok(lines("/dev/disk0\n   1: Apple_APFS Container disk0s2")));
        let err = PartitionCatalog::new(&disks, "EFI").list_candidates().unwrap_err();
        assert!(matches!(err, EspError::NoEfiPartition));
    }

    #[test]
    fn command_failure_is_enumeration_error() {
        let disks = FakeDisks(Err("diskutil failed (exit status: 1)".to_string()));
        let err = PartitionCatalog::new(&disks, "EFI").list_candidates().unwrap_err();
        match err {
            EspError::Enumeration { cause } => assert!(cause.contains("exit status")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
