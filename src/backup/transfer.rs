//! Recursive tree copy with metadata preservation.
//!
//! The registered root is resolved if it is a symlink. Links found below the
//! root are recreated as links and never followed, so cyclic links cannot
//! cause unbounded recursion. Contents, permission bits and modification
//! times are preserved; ownership is not.

use crate::error::{RescueError, Result};
use crate::utils::progress::{Progress, TransferProgress};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Sum of regular file sizes under `source`. Unreadable entries are skipped
/// here and surface during the copy itself.
pub fn scan_size(source: &Path) -> u64 {
    WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Copy `source` to `destination`, returning the number of bytes copied.
///
/// Directory creation is idempotent, so copying into an existing tree
/// overwrites files rather than failing.
pub fn copy_tree(source: &Path, destination: &Path, progress: &Progress) -> Result<u64> {
    let metadata = match fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RescueError::SourceNotFound(source.to_path_buf()));
        }
        Err(e) => return Err(transfer_failed(source, e)),
    };

    info!("Backing up {} to {}", source.display(), destination.display());

    let mut counters = TransferProgress::new(scan_size(source));
    let pb = progress.bytes(&format!("Copying {}", source.display()), counters.total);

    if metadata.is_file() {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| transfer_failed(parent, e))?;
        }
        let bytes = copy_file(source, destination, &metadata)?;
        counters.record_file(bytes);
        pb.inc(bytes);
    } else {
        let mut directories: Vec<(PathBuf, fs::Metadata)> = Vec::new();

        for entry in WalkDir::new(source).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source).to_path_buf();
                transfer_failed(&path, io::Error::from(e))
            })?;

            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = if relative.as_os_str().is_empty() {
                destination.to_path_buf()
            } else {
                destination.join(relative)
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target).map_err(|e| transfer_failed(&target, e))?;
                let metadata = entry
                    .metadata()
                    .map_err(|e| transfer_failed(entry.path(), e.into()))?;
                directories.push((target, metadata));
            } else if file_type.is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| transfer_failed(parent, e))?;
                }
                let metadata = entry
                    .metadata()
                    .map_err(|e| transfer_failed(entry.path(), e.into()))?;
                let bytes = copy_file(entry.path(), &target, &metadata)?;
                debug!("Copied {} ({} bytes)", entry.path().display(), bytes);
                counters.record_file(bytes);
                pb.inc(bytes);
            } else if file_type.is_symlink() {
                copy_symlink(entry.path(), &target)?;
            } else {
                debug!("Skipping special file {}", entry.path().display());
            }
        }

        // Deepest first so setting a parent's mtime is not undone by a child
        for (directory, metadata) in directories.iter().rev() {
            if let Err(e) = apply_metadata(directory, metadata) {
                warn!("Could not preserve metadata on {}: {}", directory.display(), e);
            }
        }
    }

    pb.finish_and_clear();
    info!(
        "Backed up {} to {} ({} files, {} bytes, {:.0}% in {})",
        source.display(),
        destination.display(),
        counters.files,
        counters.copied,
        counters.percent(),
        humantime::format_duration(Duration::from_millis(counters.elapsed().as_millis() as u64))
    );

    Ok(counters.copied)
}

fn copy_file(source: &Path, target: &Path, metadata: &fs::Metadata) -> Result<u64> {
    // Never write through a stale link left at the target
    if let Ok(existing) = fs::symlink_metadata(target) {
        if existing.file_type().is_symlink() {
            fs::remove_file(target).map_err(|e| transfer_failed(target, e))?;
        }
    }

    let bytes = fs::copy(source, target).map_err(|e| transfer_failed(source, e))?;
    apply_metadata(target, metadata).map_err(|e| transfer_failed(target, e))?;
    Ok(bytes)
}

/// Copy permission bits and modification time from `metadata` onto `path`.
fn apply_metadata(path: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    // Times first: a read-only mode must not block the open
    let modified = metadata.modified()?;
    fs::File::open(path)?.set_modified(modified)?;
    fs::set_permissions(path, metadata.permissions())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source).map_err(|e| transfer_failed(source, e))?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target).map_err(|e| transfer_failed(target, e))?;
    }
    std::os::unix::fs::symlink(&link, target).map_err(|e| transfer_failed(target, e))?;
    debug!("Linked {} -> {}", target.display(), link.display());
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, _target: &Path) -> Result<()> {
    warn!("Skipping symlink {} (not supported on this platform)", source.display());
    Ok(())
}

fn transfer_failed(path: &Path, source: io::Error) -> RescueError {
    RescueError::TransferFailed {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("config/nested")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("data.db"), b"0123456789").unwrap();
        fs::write(root.join("config/settings.xml"), b"<settings/>").unwrap();
        fs::write(root.join("config/nested/deep.txt"), b"deep").unwrap();
    }

    #[test]
    fn test_copy_tree_copies_everything() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("jellyfin");
        let dst = tmp.path().join("backup/jellyfin");
        sample_tree(&src);

        let bytes = copy_tree(&src, &dst, &Progress::hidden()).unwrap();

        assert_eq!(bytes, 10 + 11 + 4);
        assert_eq!(bytes, scan_size(&src));
        assert_eq!(fs::read(dst.join("data.db")).unwrap(), b"0123456789");
        assert_eq!(fs::read(dst.join("config/nested/deep.txt")).unwrap(), b"deep");
        assert!(dst.join("empty").is_dir());
        assert_eq!(fs::read_dir(dst.join("empty")).unwrap().count(), 0);
    }

    #[test]
    fn test_copy_tree_preserves_mtime() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::File::open(src.join("data.db")).unwrap().set_modified(old).unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst, &Progress::hidden()).unwrap();

        let copied = fs::metadata(dst.join("data.db")).unwrap().modified().unwrap();
        assert_eq!(copied, old);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_preserves_mode_and_links() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        fs::set_permissions(src.join("data.db"), fs::Permissions::from_mode(0o640)).unwrap();
        std::os::unix::fs::symlink("config", src.join("config-link")).unwrap();
        // A loop that would never terminate if links were followed
        std::os::unix::fs::symlink("..", src.join("config/nested/up")).unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst, &Progress::hidden()).unwrap();

        let mode = fs::metadata(dst.join("data.db")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert_eq!(fs::read_link(dst.join("config-link")).unwrap(), PathBuf::from("config"));
        assert_eq!(fs::read_link(dst.join("config/nested/up")).unwrap(), PathBuf::from(".."));
    }

    #[test]
    fn test_copy_tree_missing_source() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = copy_tree(&missing, &tmp.path().join("dst"), &Progress::hidden()).unwrap_err();
        assert!(matches!(err, RescueError::SourceNotFound(p) if p == missing));
        assert!(!tmp.path().join("dst").exists());
    }

    #[test]
    fn test_copy_tree_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let dst = tmp.path().join("dst");

        copy_tree(&src, &dst, &Progress::hidden()).unwrap();
        fs::write(src.join("data.db"), b"changed").unwrap();
        copy_tree(&src, &dst, &Progress::hidden()).unwrap();

        assert_eq!(fs::read(dst.join("data.db")).unwrap(), b"changed");
    }

    #[test]
    fn test_copy_single_file() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("nginx.conf");
        fs::write(&src, b"worker_processes 1;").unwrap();
        let dst = tmp.path().join("stage/nginx.conf");

        let bytes = copy_tree(&src, &dst, &Progress::hidden()).unwrap();
        assert_eq!(bytes, 19);
        assert_eq!(fs::read(&dst).unwrap(), b"worker_processes 1;");
    }

    #[test]
    fn test_file_copy_failure_is_transfer_failed() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let dst = tmp.path().join("dst");
        // A directory where a file belongs cannot be opened for writing, even by root
        fs::create_dir_all(dst.join("config/settings.xml/occupied")).unwrap();

        let err = copy_tree(&src, &dst, &Progress::hidden()).unwrap_err();
        let expected = src.join("config/settings.xml");
        assert!(
            matches!(err, RescueError::TransferFailed { ref path, .. } if *path == expected),
            "{:?}",
            err
        );
        assert!(dst.join("config/settings.xml/occupied").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_transfer_failed() {
        use std::os::unix::fs::PermissionsExt;

        if crate::utils::privilege::is_elevated() {
            // root reads through mode 000
            return;
        }
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let locked = src.join("config/nested/deep.txt");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let err = copy_tree(&src, &tmp.path().join("dst"), &Progress::hidden()).unwrap_err();
        assert!(matches!(err, RescueError::TransferFailed { ref path, .. } if *path == locked));
    }
}
