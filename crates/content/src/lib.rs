use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Zip,
}

/// A local bootloader distribution tree. Extracted archives are removed when
/// this value is dropped.
#[derive(Debug)]
pub struct PreparedSource {
    pub root: PathBuf,
    pub kind: SourceKind,
    _scratch: Option<ScratchDir>,
}

pub fn prepare_source(path: impl AsRef<Path>) -> Result<PreparedSource> {
    prepare_source_in(path, std::env::temp_dir())
}

/// Like [`prepare_source`], extracting archives below `scratch_base`.
pub fn prepare_source_in(path: impl AsRef<Path>, scratch_base: impl AsRef<Path>) -> Result<PreparedSource> {
    let path = path.as_ref();
    if path.is_dir() {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        debug!("event=source_directory path={}", root.display());
        return Ok(PreparedSource {
            root,
            kind: SourceKind::Directory,
            _scratch: None,
        });
    }

    if path.is_file() && is_zip(path) {
        let scratch = ScratchDir::create(scratch_base.as_ref())?;
        extract_zip(path, &scratch.path)?;
        info!(
            "event=source_extracted archive={} root={}",
            path.display(),
            scratch.path.display()
        );
        return Ok(PreparedSource {
            root: scratch.path.clone(),
            kind: SourceKind::Zip,
            _scratch: Some(scratch),
        });
    }

    Err(anyhow!("unsupported source path {}", path.display()))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("read archive {}", archive.display()))?;
    zip.extract(dest)
        .with_context(|| format!("extract {} to {}", archive.display(), dest.display()))?;
    Ok(())
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

#[derive(Debug)]
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(base: &Path) -> Result<Self> {
        let path = base.join(format!("cloverup_src_{}", Uuid::new_v4()));
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("event=scratch_cleanup_failed path={} cause={}", self.path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn directory_is_used_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = prepare_source(dir.path()).unwrap();
        assert_eq!(prepared.kind, SourceKind::Directory);
        assert_eq!(prepared.root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn zip_is_extracted_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Clover.zip");
        write_zip(
            &archive,
            &[
                ("CloverV2/EFI/CLOVER/CLOVERX64.efi", &b"loader"[..]),
                ("CloverV2/EFI/BOOT/BOOTX64.efi", &b"stub"[..]),
            ],
        );
        let scratch = dir.path().join("scratch");

        let root = {
            let prepared = prepare_source_in(&archive, &scratch).unwrap();
            assert_eq!(prepared.kind, SourceKind::Zip);
            assert_eq!(
                fs::read(prepared.root.join("CloverV2/EFI/CLOVER/CLOVERX64.efi")).unwrap(),
                b"loader"
            );
            prepared.root.clone()
        };
        assert!(!root.exists());
    }

    #[test]
    fn other_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Clover.pkg");
        fs::write(&path, b"xar!").unwrap();
        assert!(prepare_source(&path).is_err());
    }
}
