use cloverup_bootloader_core::{is_driver_file, BOOT_STUB, PRIMARY_LOADER, UEFI_DRIVERS_DIR};
use cloverup_core::{EspError, UpdateTarget};
use cloverup_report::OperationRecord;
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Replaced,
    Copied,
    Removed,
}

/// Result of one file-level unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub action: FileAction,
    pub path: PathBuf,
    pub error: Option<String>,
}

impl FileOutcome {
    fn ok(action: FileAction, path: PathBuf) -> Self {
        Self {
            action,
            path,
            error: None,
        }
    }

    fn failed(action: FileAction, path: PathBuf, error: impl ToString) -> Self {
        Self {
            action,
            path,
            error: Some(error.to_string()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn describe(&self) -> String {
        let verb = match self.action {
            FileAction::Replaced => "replace",
            FileAction::Copied => "copy",
            FileAction::Removed => "remove",
        };
        match &self.error {
            None => format!("{} {}", verb, self.path.display()),
            Some(err) => format!("{} {} failed: {}", verb, self.path.display(), err),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriverSyncReport {
    /// The distribution ships no driver directory; nothing was touched.
    pub source_missing: bool,
    pub removed: Vec<FileOutcome>,
    pub copied: Vec<FileOutcome>,
}

impl DriverSyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.removed
            .iter()
            .chain(self.copied.iter())
            .filter(|outcome| !outcome.succeeded())
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[derive(Debug)]
pub struct UpdateSummary {
    pub boot_stub: Result<FileOutcome, EspError>,
    pub primary_loader: Result<FileOutcome, EspError>,
    pub drivers: Result<DriverSyncReport, EspError>,
}

impl UpdateSummary {
    pub fn succeeded(&self) -> bool {
        self.boot_stub.is_ok()
            && self.primary_loader.is_ok()
            && self.drivers.as_ref().map(|r| r.succeeded()).unwrap_or(false)
    }
}

pub struct UpdateOrchestrator {
    target: UpdateTarget,
    aux_driver: PathBuf,
}

impl UpdateOrchestrator {
    /// `aux_driver` is relative to `target.aux_driver_root`.
    pub fn new(target: UpdateTarget, aux_driver: impl Into<PathBuf>) -> Self {
        Self {
            target,
            aux_driver: aux_driver.into(),
        }
    }

    pub fn target(&self) -> &UpdateTarget {
        &self.target
    }

    pub fn replace_boot_stub(&self) -> Result<FileOutcome, EspError> {
        info!("event=start_update_bootx64");
        let result = self.replace_binary(BOOT_STUB);
        match &result {
            Ok(_) => info!("event=success_update_bootx64"),
            Err(err) => error!("event=error_updating_bootx64 error={}", err),
        }
        result
    }

    pub fn replace_primary_loader(&self) -> Result<FileOutcome, EspError> {
        info!("event=start_update_cloverx64");
        let result = self.replace_binary(PRIMARY_LOADER);
        match &result {
            Ok(_) => info!("event=success_update_cloverx64"),
            Err(err) => error!("event=error_updating_cloverx64 error={}", err),
        }
        result
    }

    /// Replaces the flat driver files of `EFI/CLOVER/drivers/UEFI`. Per-file
    /// failures land in the report; subdirectories are left alone.
    pub fn replace_drivers(&self) -> Result<DriverSyncReport, EspError> {
        info!("event=start_update_drivers");
        let source_dir = self.target.source_root.join(UEFI_DRIVERS_DIR);
        let dest_dir = self.target.efi_root.join(UEFI_DRIVERS_DIR);
        let mut report = DriverSyncReport::default();

        info!("event=listing_drivers source={}", source_dir.display());
        if !source_dir.is_dir() {
            warn!("event=driver_not_found source={}", source_dir.display());
            report.source_missing = true;
            return Ok(report);
        }

        if dest_dir.is_dir() {
            for path in flat_files(&dest_dir)? {
                let outcome = match fs::remove_file(&path) {
                    Ok(()) => FileOutcome::ok(FileAction::Removed, path),
                    Err(err) => {
                        warn!("event=driver_remove_failed path={} cause={}", path.display(), err);
                        FileOutcome::failed(FileAction::Removed, path, err)
                    }
                };
                report.removed.push(outcome);
            }
        } else {
            fs::create_dir_all(&dest_dir).map_err(|err| EspError::update(&dest_dir, err))?;
        }

        let drivers: Vec<PathBuf> = flat_files(&source_dir)?
            .into_iter()
            .filter(|path| is_driver_file(path))
            .collect();
        for source in drivers {
            report.copied.push(copy_driver(&source, &dest_dir));
        }

        let aux_source = self.target.aux_driver_root.join(&self.aux_driver);
        report.copied.push(copy_driver(&aux_source, &dest_dir));

        if report.succeeded() {
            info!("event=uefi_drivers_updated copied={}", report.copied.len());
        } else {
            error!(
                "event=error_updating_drivers failures={}",
                report.failures().count()
            );
        }
        Ok(report)
    }

    /// Runs every replacement in order; a failure never stops the later steps.
    pub fn update_all(&self) -> UpdateSummary {
        info!("event=start_full_update");
        let summary = UpdateSummary {
            boot_stub: self.replace_boot_stub(),
            primary_loader: self.replace_primary_loader(),
            drivers: self.replace_drivers(),
        };
        if summary.succeeded() {
            info!("event=full_update_success");
        } else {
            error!("event=error_updating_clover");
        }
        summary
    }

    fn replace_binary(&self, rel: &str) -> Result<FileOutcome, EspError> {
        let source = self.target.source_root.join(rel);
        let dest = self.target.efi_root.join(rel);
        if !source.is_file() {
            return Err(EspError::update(
                &dest,
                format!("source binary {} not found", source.display()),
            ));
        }
        replace_file(&source, &dest).map_err(|err| EspError::update(&dest, err))?;
        Ok(FileOutcome::ok(FileAction::Replaced, dest))
    }
}

/// Writes a sibling temp file and renames it over `dest`.
fn replace_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| std::io::Error::other("destination has no parent directory"))?;
    fs::create_dir_all(parent)?;
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.cloverup-tmp", name));
    let result = fs::copy(source, &staging).and_then(|_| fs::rename(&staging, dest));
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn copy_driver(source: &Path, dest_dir: &Path) -> FileOutcome {
    let Some(name) = source.file_name() else {
        return FileOutcome::failed(FileAction::Copied, source.to_path_buf(), "no file name");
    };
    let dest = dest_dir.join(name);
    if !source.is_file() {
        warn!("event=driver_not_found source={}", source.display());
        return FileOutcome::failed(
            FileAction::Copied,
            dest,
            format!("{} not found", source.display()),
        );
    }
    match fs::copy(source, &dest) {
        Ok(_) => {
            info!("event=driver_updated driver={}", name.to_string_lossy());
            FileOutcome::ok(FileAction::Copied, dest)
        }
        Err(err) => {
            warn!("event=driver_copy_failed driver={} cause={}", name.to_string_lossy(), err);
            FileOutcome::failed(FileAction::Copied, dest, err)
        }
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn flat_files(dir: &Path) -> Result<Vec<PathBuf>, EspError> {
    let entries = fs::read_dir(dir).map_err(|err| EspError::update(dir, err))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EspError::update(dir, err))?;
        let is_file = entry
            .file_type()
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn record_binary(name: &str, result: &Result<FileOutcome, EspError>) -> OperationRecord {
    OperationRecord {
        name: name.to_string(),
        succeeded: result.is_ok(),
        details: vec![match result {
            Ok(outcome) => outcome.describe(),
            Err(err) => err.to_string(),
        }],
    }
}

pub fn record_drivers(result: &Result<DriverSyncReport, EspError>) -> OperationRecord {
    match result {
        Ok(report) => {
            let mut details: Vec<String> = report
                .removed
                .iter()
                .chain(report.copied.iter())
                .map(FileOutcome::describe)
                .collect();
            if report.source_missing {
                details.push("source driver directory missing".to_string());
            }
            OperationRecord {
                name: "update_drivers".to_string(),
                succeeded: report.succeeded(),
                details,
            }
        }
        Err(err) => OperationRecord {
            name: "update_drivers".to_string(),
            succeeded: false,
            details: vec![err.to_string()],
        },
    }
}
