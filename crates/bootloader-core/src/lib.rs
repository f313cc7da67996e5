use cloverup_core::{BootloaderKind, EspError};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

pub const CLOVER_DIR: &str = "EFI/CLOVER";
pub const BOOT_STUB: &str = "EFI/BOOT/BOOTX64.efi";
pub const PRIMARY_LOADER: &str = "EFI/CLOVER/CLOVERX64.efi";
pub const UEFI_DRIVERS_DIR: &str = "EFI/CLOVER/drivers/UEFI";
pub const DRIVER_EXTENSION: &str = "efi";

/// Marker sets in detection order; the first one present wins.
const MARKERS: [(BootloaderKind, Marker); 3] = [
    (
        BootloaderKind::Clover,
        Marker::DirWithFile("EFI/CLOVER", "CLOVERX64.efi"),
    ),
    (
        BootloaderKind::OpenCore,
        Marker::DirWithFile("EFI/OC", "OpenCore.efi"),
    ),
    (
        BootloaderKind::Windows,
        Marker::File("EFI/Microsoft/Boot/bootmgfw.efi"),
    ),
];

#[derive(Debug, Clone, Copy)]
enum Marker {
    DirWithFile(&'static str, &'static str),
    File(&'static str),
}

impl Marker {
    fn present(&self, root: &Path) -> bool {
        match self {
            Marker::DirWithFile(dir, file) => {
                let dir = root.join(dir);
                dir.is_dir() && dir.join(file).is_file()
            }
            Marker::File(file) => root.join(file).is_file(),
        }
    }
}

/// Classifies the occupant of a mounted ESP. Reads the tree on every call.
pub fn detect(efi_root: impl AsRef<Path>) -> BootloaderKind {
    let efi_root = efi_root.as_ref();
    info!("event=detecting_bootloader efi_dir={}", efi_root.display());
    let kind = MARKERS
        .iter()
        .find(|(_, marker)| marker.present(efi_root))
        .map(|(kind, _)| *kind)
        .unwrap_or(BootloaderKind::Unknown);
    match kind {
        BootloaderKind::Clover => info!("event=clover_detected"),
        BootloaderKind::OpenCore => error!("event=opencore_detected"),
        BootloaderKind::Windows => warn!("event=windows_bootmgr_detected"),
        BootloaderKind::Unknown => warn!("event=unknown_bootloader"),
    }
    kind
}

/// A Clover distribution tree ready to be copied from.
#[derive(Debug, Clone)]
pub struct CloverPackage {
    pub root: PathBuf,
}

impl CloverPackage {
    pub fn boot_stub(&self) -> PathBuf {
        self.root.join(BOOT_STUB)
    }

    pub fn primary_loader(&self) -> PathBuf {
        self.root.join(PRIMARY_LOADER)
    }

    pub fn drivers_dir(&self) -> PathBuf {
        self.root.join(UEFI_DRIVERS_DIR)
    }
}

/// Finds the Clover tree in `path` itself or one directory below it
/// (release archives wrap everything in `CloverV2/`).
pub fn validate_clover_package(path: impl AsRef<Path>) -> Result<CloverPackage, EspError> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Err(EspError::InvalidSource {
            path: path.to_path_buf(),
            cause: "not a directory".to_string(),
        });
    }
    if path.join(CLOVER_DIR).is_dir() {
        return Ok(CloverPackage {
            root: path.to_path_buf(),
        });
    }

    let mut nested: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(|err| EspError::InvalidSource {
            path: path.to_path_buf(),
            cause: err.to_string(),
        })?
        .flatten()
        .map(|entry| entry.path())
        .filter(|candidate| candidate.join(CLOVER_DIR).is_dir())
        .collect();
    nested.sort();
    match nested.into_iter().next() {
        Some(root) => Ok(CloverPackage { root }),
        None => Err(EspError::InvalidSource {
            path: path.to_path_buf(),
            cause: format!("{} not found", CLOVER_DIR),
        }),
    }
}

pub fn is_driver_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(DRIVER_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn clover_wins_over_opencore() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "EFI/OC/OpenCore.efi");
        touch(dir.path(), "EFI/CLOVER/CLOVERX64.efi");
        touch(dir.path(), "EFI/Microsoft/Boot/bootmgfw.efi");
        touch(dir.path(), "EFI/APPLE/unrelated.bin");
        assert_eq!(detect(dir.path()), BootloaderKind::Clover);
    }

    #[test]
    fn opencore_without_clover_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("EFI/CLOVER")).unwrap();
        touch(dir.path(), "EFI/OC/OpenCore.efi");
        assert_eq!(detect(dir.path()), BootloaderKind::OpenCore);
    }

    #[test]
    fn windows_boot_manager() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "EFI/Microsoft/Boot/bootmgfw.efi");
        assert_eq!(detect(dir.path()), BootloaderKind::Windows);
    }

    #[test]
    fn empty_tree_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path()), BootloaderKind::Unknown);
        // a directory where the binary should be is not a marker
        fs::create_dir_all(dir.path().join("EFI/CLOVER/CLOVERX64.efi")).unwrap();
        assert_eq!(detect(dir.path()), BootloaderKind::Unknown);
    }

    #[test]
    fn detection_sees_tree_changes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "EFI/OC/OpenCore.efi");
        assert_eq!(detect(dir.path()), BootloaderKind::OpenCore);
        touch(dir.path(), "EFI/CLOVER/CLOVERX64.efi");
        assert_eq!(detect(dir.path()), BootloaderKind::Clover);
    }

    #[test]
    fn package_found_one_level_down() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "CloverV2/EFI/CLOVER/CLOVERX64.efi");
        let package = validate_clover_package(dir.path()).unwrap();
        assert_eq!(package.root, dir.path().join("CloverV2"));
        assert_eq!(
            package.primary_loader(),
            dir.path().join("CloverV2/EFI/CLOVER/CLOVERX64.efi")
        );
    }

    #[test]
    fn package_without_clover_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "EFI/BOOT/BOOTX64.efi");
        assert!(matches!(
            validate_clover_package(dir.path()),
            Err(EspError::InvalidSource { .. })
        ));
    }

    #[test]
    fn driver_extension_ignores_case() {
        assert!(is_driver_file(Path::new("ApfsDriverLoader.efi")));
        assert!(is_driver_file(Path::new("HFSPlus.EFI")));
        assert!(!is_driver_file(Path::new("README.txt")));
    }
}
