use std::fs::{self, File, FileTimes};
use std::path::Path;

use sha2::{Digest, Sha256};

use super::error::SortError;
use crate::types::OperationKind;

/// What an operation actually did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Copied,
    Moved,
    /// Sync wrote the destination (absent or different content).
    Synced,
    /// Sync found identical content and wrote nothing.
    Unchanged,
}

/// Apply `kind` to move `src` into `dest`, creating parent directories.
pub fn execute(kind: OperationKind, src: &Path, dest: &Path) -> Result<OperationOutcome, SortError> {
    match kind {
        OperationKind::Copy => copy_file(src, dest).map(|()| OperationOutcome::Copied),
        OperationKind::Move => move_file(src, dest).map(|()| OperationOutcome::Moved),
        OperationKind::Sync => sync_file(src, dest),
    }
}

/// Create the destination's parent directories. Tolerates another process
/// creating them concurrently.
fn ensure_parent(dest: &Path) -> Result<(), SortError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SortError::io(parent, e))?;
    }
    Ok(())
}

/// A read-only file left by an earlier copy can't be truncated in place.
fn remove_readonly(dest: &Path) -> Result<(), SortError> {
    match fs::metadata(dest) {
        Ok(m) if m.is_file() && m.permissions().readonly() => {
            fs::remove_file(dest).map_err(|e| SortError::io(dest, e))
        }
        _ => Ok(()),
    }
}

/// Copy content and permissions, then carry over access/modify times.
///
/// The copy inherits the source's mode, which may be read-only, so the times
/// are set through a read handle. On Unix the owner may do that without
/// write access.
fn copy_file(src: &Path, dest: &Path) -> Result<(), SortError> {
    ensure_parent(dest)?;
    remove_readonly(dest)?;
    fs::copy(src, dest).map_err(|e| SortError::io(src, e))?;

    let metadata = fs::metadata(src).map_err(|e| SortError::io(src, e))?;
    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    let file = File::open(dest).map_err(|e| SortError::io(dest, e))?;
    file.set_times(times).map_err(|e| SortError::io(dest, e))?;
    Ok(())
}

/// Rename when possible; across volumes fall back to copy, flush, delete.
fn move_file(src: &Path, dest: &Path) -> Result<(), SortError> {
    ensure_parent(dest)?;
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SortError::io(src, e)),
        Err(e) => {
            tracing::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dest.display(),
                e
            );
            copy_file(src, dest)?;
            File::open(dest)
                .and_then(|f| f.sync_all())
                .map_err(|e| SortError::io(dest, e))?;
            fs::remove_file(src).map_err(|e| SortError::io(src, e))
        }
    }
}

/// Copy only when the destination is missing or its content differs.
fn sync_file(src: &Path, dest: &Path) -> Result<OperationOutcome, SortError> {
    if dest.exists() && file_sha256(src)? == file_sha256(dest)? {
        tracing::debug!("{} is up to date", dest.display());
        return Ok(OperationOutcome::Unchanged);
    }
    copy_file(src, dest)?;
    Ok(OperationOutcome::Synced)
}

/// Streamed SHA-256 of a file's content.
pub fn file_sha256(path: &Path) -> Result<[u8; 32], SortError> {
    let mut file = File::open(path).map_err(|e| SortError::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| SortError::io(path, e))?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_copy_creates_dirs_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("out/2024/03 Mar 2024/a.jpg");
        fs::write(&src, b"pixels").unwrap();

        let outcome = execute(OperationKind::Copy, &src, &dest).unwrap();
        assert_eq!(outcome, OperationOutcome::Copied);
        assert!(src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"pixels").unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_times(FileTimes::new().set_modified(old))
            .unwrap();

        let dest = dir.path().join("out/a.jpg");
        execute(OperationKind::Copy, &src, &dest).unwrap();
        assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), old);
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_read_only_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("DCIM_0001.jpg");
        fs::write(&src, b"from the card").unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_times(FileTimes::new().set_modified(old))
            .unwrap();
        set_mode(&src, 0o444);

        let dest = dir.path().join("out/DCIM_0001.jpg");
        assert_eq!(
            execute(OperationKind::Copy, &src, &dest).unwrap(),
            OperationOutcome::Copied
        );
        assert_eq!(fs::read(&dest).unwrap(), b"from the card");
        assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), old);
        assert!(fs::metadata(&dest).unwrap().permissions().readonly());

        // A later sync with new content replaces the read-only copy
        let edited = dir.path().join("edited.jpg");
        fs::write(&edited, b"retouched").unwrap();
        set_mode(&edited, 0o444);
        assert_eq!(
            execute(OperationKind::Sync, &edited, &dest).unwrap(),
            OperationOutcome::Synced
        );
        assert_eq!(fs::read(&dest).unwrap(), b"retouched");
    }

    #[test]
    fn test_copy_into_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"x").unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();

        execute(OperationKind::Copy, &src, &dir.path().join("out/a.txt")).unwrap();
        assert!(dir.path().join("out/a.txt").exists());
    }

    #[test]
    fn test_move_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.mov");
        let dest = dir.path().join("out/a.mov");
        fs::write(&src, b"frames").unwrap();

        let outcome = execute(OperationKind::Move, &src, &dest).unwrap();
        assert_eq!(outcome, OperationOutcome::Moved);
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"frames");
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("gone.jpg");
        for kind in [OperationKind::Copy, OperationKind::Move, OperationKind::Sync] {
            let err = execute(kind, &src, &dir.path().join("out/gone.jpg")).unwrap_err();
            match err {
                SortError::Io { source, .. } => {
                    assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_sync_writes_once_for_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("out/a.jpg");
        fs::write(&src, b"same bytes").unwrap();

        assert_eq!(
            execute(OperationKind::Sync, &src, &dest).unwrap(),
            OperationOutcome::Synced
        );
        assert_eq!(
            execute(OperationKind::Sync, &src, &dest).unwrap(),
            OperationOutcome::Unchanged
        );
    }

    #[test]
    fn test_sync_overwrites_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        let dest = dir.path().join("out/a.jpg");
        fs::write(&src, b"v1").unwrap();
        execute(OperationKind::Sync, &src, &dest).unwrap();

        fs::write(&src, b"v2").unwrap();
        assert_eq!(
            execute(OperationKind::Sync, &src, &dest).unwrap(),
            OperationOutcome::Synced
        );
        assert_eq!(fs::read(&dest).unwrap(), b"v2");
    }

    #[test]
    fn test_sha256_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        let hex: String = file_sha256(&path)
            .unwrap()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
