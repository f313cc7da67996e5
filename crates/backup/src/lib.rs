use cloverup_core::{
    format_compact, format_rfc3339_utc, local_now, BackupSnapshot, EspError, Settings,
    BACKUP_DIR_PREFIX,
};
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o444;

pub struct BackupEngine {
    store: PathBuf,
    free_space_margin: u64,
}

impl BackupEngine {
    pub fn new(settings: &Settings) -> Self {
        Self::with_store(settings.backup_store(), settings.min_free_space_margin_bytes)
    }

    pub fn with_store(store: impl Into<PathBuf>, free_space_margin: u64) -> Self {
        Self {
            store: store.into(),
            free_space_margin,
        }
    }

    pub fn snapshot(&self, partition_id: &str, efi_root: &Path) -> Result<BackupSnapshot, EspError> {
        self.snapshot_at(partition_id, efi_root, local_now())
    }

    /// Copies the whole ESP into a fresh `EFI-Backup-<timestamp>[-n]`
    /// directory named after `at`. Only reads from `efi_root`.
    pub fn snapshot_at(
        &self,
        partition_id: &str,
        efi_root: &Path,
        at: OffsetDateTime,
    ) -> Result<BackupSnapshot, EspError> {
        let plan = scan_tree(efi_root).map_err(|err| {
            error!("event=error_creating_backup stage=scan cause={}", err);
            EspError::backup(&self.store, err)
        })?;
        self.check_store_outside(efi_root)?;
        self.check_free_space(plan.bytes)?;

        let destination = reserve_destination(&self.store, &format_compact(at))
            .map_err(|err| EspError::backup(&self.store, err))?;
        info!("event=creating_backup backup_dir={}", destination.display());

        let result = copy_tree(efi_root, &destination)
            .and_then(|stats| verify_tree(efi_root, &destination).map(|_| stats))
            .and_then(|stats| normalize_permissions(&destination).map(|_| stats));
        let stats = result.map_err(|err| {
            error!(
                "event=error_creating_backup backup_dir={} cause={}",
                destination.display(),
                err
            );
            warn!("event=partial_backup_left backup_dir={}", destination.display());
            EspError::backup(&destination, err)
        })?;

        info!(
            "event=backup_created backup_dir={} files={} bytes={}",
            destination.display(),
            stats.files,
            stats.bytes
        );
        Ok(BackupSnapshot {
            source_partition_id: partition_id.to_string(),
            created_at: format_rfc3339_utc(at),
            destination,
            file_count: stats.files,
            total_bytes: stats.bytes,
        })
    }

    /// A store on the partition itself would be copied into itself and
    /// leave backups on the ESP.
    fn check_store_outside(&self, efi_root: &Path) -> Result<(), EspError> {
        let esp = fs::canonicalize(efi_root)
            .map_err(|err| EspError::backup(&self.store, with_path(efi_root, err)))?;
        let anchor = existing_ancestor(&self.store);
        let anchor = fs::canonicalize(&anchor)
            .map_err(|err| EspError::backup(&self.store, with_path(&anchor, err)))?;
        if anchor.starts_with(&esp) {
            error!(
                "event=error_creating_backup stage=store store={} efi_dir={}",
                self.store.display(),
                esp.display()
            );
            return Err(EspError::backup(
                &self.store,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("backup store lies inside the EFI partition {}", esp.display()),
                ),
            ));
        }
        Ok(())
    }

    fn check_free_space(&self, needed: u64) -> Result<(), EspError> {
        let probe = existing_ancestor(&self.store);
        let Some(free) = free_space_bytes(&probe) else {
            warn!("event=free_space_unknown path={}", probe.display());
            return Ok(());
        };
        let required = needed.saturating_add(self.free_space_margin);
        if free < required {
            error!(
                "event=backup_insufficient_space path={} free={} required={}",
                probe.display(),
                free,
                required
            );
            return Err(EspError::backup(
                &self.store,
                io::Error::other(format!(
                    "not enough free space: {} bytes free, {} required",
                    free, required
                )),
            ));
        }
        Ok(())
    }
}

/// Creates the first free `EFI-Backup-<timestamp>[-n]` directory. Existing
/// directories are never reused.
pub fn reserve_destination(store: &Path, timestamp: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(store).map_err(|err| with_path(store, err))?;
    let base = format!("{}{}", BACKUP_DIR_PREFIX, timestamp);
    let mut candidate = store.join(&base);
    let mut count = 1u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                candidate = store.join(format!("{}-{}", base, count));
                count += 1;
            }
            Err(err) => return Err(with_path(&candidate, err)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TreeStats {
    files: usize,
    bytes: u64,
}

fn scan_tree(root: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    scan_tree_inner(root, &mut stats)?;
    Ok(stats)
}

fn scan_tree_inner(current: &Path, stats: &mut TreeStats) -> io::Result<()> {
    for entry in fs::read_dir(current).map_err(|err| with_path(current, err))? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            scan_tree_inner(&entry.path(), stats)?;
        } else if file_type.is_file() {
            stats.files += 1;
            stats.bytes = stats.bytes.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    copy_tree_inner(source, dest, &mut stats)?;
    Ok(stats)
}

fn copy_tree_inner(source: &Path, dest: &Path, stats: &mut TreeStats) -> io::Result<()> {
    for entry in fs::read_dir(source).map_err(|err| with_path(source, err))? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            copy_symlink(&path, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir(&target).map_err(|err| with_path(&target, err))?;
            copy_tree_inner(&path, &target, stats)?;
        } else if file_type.is_file() {
            let bytes = fs::copy(&path, &target).map_err(|err| with_path(&path, err))?;
            stats.files += 1;
            stats.bytes = stats.bytes.saturating_add(bytes);
        } else {
            warn!("event=backup_skip_special path={}", path.display());
        }
    }
    Ok(())
}

fn verify_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in fs::read_dir(source).map_err(|err| with_path(source, err))? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            verify_tree(&path, &target)?;
        } else if file_type.is_file() {
            let expected = fs::metadata(&path)?.len();
            let actual = fs::metadata(&target).map_err(|err| with_path(&target, err))?.len();
            if expected != actual || hash_file(&path)? != hash_file(&target)? {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("verify failed for {}", target.display()),
                ));
            }
        }
    }
    Ok(())
}

fn normalize_permissions(root: &Path) -> io::Result<()> {
    for entry in fs::read_dir(root).map_err(|err| with_path(root, err))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            normalize_permissions(&path)?;
            set_mode(&path, DIR_MODE)?;
        } else if file_type.is_file() {
            set_mode(&path, FILE_MODE)?;
        }
    }
    set_mode(root, DIR_MODE)
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path).map_err(|err| with_path(path, err))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn with_path(path: &Path, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let points_to = fs::read_link(link).map_err(|err| with_path(link, err))?;
    std::os::unix::fs::symlink(&points_to, target).map_err(|err| with_path(target, err))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot copy symbolic link {}", link.display()),
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|err| with_path(path, err))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions).map_err(|err| with_path(path, err))
}

fn free_space_bytes(path: &Path) -> Option<u64> {
    #[cfg(unix)]
    {
        use libc::statvfs;
        use std::ffi::CString;
        use std::mem::MaybeUninit;

        let c_path = CString::new(path.display().to_string()).ok()?;
        let mut stats = MaybeUninit::zeroed();
        let result = unsafe { statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
        if result != 0 {
            return None;
        }
        let stats: libc::statvfs = unsafe { stats.assume_init() };
        Some((stats.f_bavail as u64).saturating_mul(stats.f_frsize as u64))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}
