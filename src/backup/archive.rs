//! Packing staged directories into compressed tarballs and unpacking them.
//!
//! Entries are rooted at the staged directory's own name, so extracting an
//! archive recreates that folder. When the staged directory carries a
//! manifest it is always the first entry, letting restore read it without
//! decoding the rest of the stream. Extraction overwrites in place and does
//! not roll back: a failure midway leaves the entries unpacked so far.

use super::manifest::{Manifest, MANIFEST_FILE};
use super::naming::ArchiveFormat;
use super::transfer::scan_size;
use crate::error::{RescueError, Result};
use crate::utils::progress::Progress;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use indicatif::ProgressBar;
use std::cell::Cell;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

const XZ_LEVEL: u32 = 6;
const ZSTD_LEVEL: i32 = 19;

enum Encoder<W: Write> {
    Xz(XzEncoder<W>),
    Gz(GzEncoder<W>),
    Zst(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    fn new(format: ArchiveFormat, inner: W) -> io::Result<Self> {
        Ok(match format {
            ArchiveFormat::Xz => Encoder::Xz(XzEncoder::new(inner, XZ_LEVEL)),
            ArchiveFormat::Gz => Encoder::Gz(GzEncoder::new(inner, flate2::Compression::best())),
            ArchiveFormat::Zst => {
                Encoder::Zst(zstd::stream::write::Encoder::new(inner, ZSTD_LEVEL)?)
            }
        })
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Xz(e) => e.finish(),
            Encoder::Gz(e) => e.finish(),
            Encoder::Zst(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Xz(e) => e.write(buf),
            Encoder::Gz(e) => e.write(buf),
            Encoder::Zst(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Xz(e) => e.flush(),
            Encoder::Gz(e) => e.flush(),
            Encoder::Zst(e) => e.flush(),
        }
    }
}

/// Reader that remembers whether the underlying stream ever failed, so
/// decode errors can be told apart from write-side errors during unpack.
struct Tracked<R> {
    inner: R,
    failed: Rc<Cell<bool>>,
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            self.failed.set(true);
            e
        })
    }
}

/// Pack `directory` into `<directory><ext>` and delete the directory.
///
/// An existing archive at that path is never overwritten. A failure to
/// delete the staged directory only warns: the archive is the authoritative
/// result at that point.
pub fn compress(directory: &Path, format: ArchiveFormat, progress: &Progress) -> Result<PathBuf> {
    let archive_path = format.archive_path(directory);
    info!("Compressing {} into {}", directory.display(), archive_path.display());

    if let Err(e) = write_archive(directory, &archive_path, format, progress) {
        // AlreadyExists comes from create_new, so the file belongs to an earlier run
        if e.kind() != io::ErrorKind::AlreadyExists && archive_path.exists() {
            let _ = fs::remove_file(&archive_path);
        }
        return Err(RescueError::ArchiveFailed {
            path: directory.to_path_buf(),
            source: e,
        });
    }

    let size = fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
    info!("Archive written: {} ({} bytes)", archive_path.display(), size);

    if let Err(e) = fs::remove_dir_all(directory) {
        warn!(
            "Archive {} is complete but staged directory {} could not be removed: {}",
            archive_path.display(),
            directory.display(),
            e
        );
    }

    Ok(archive_path)
}

fn write_archive(
    directory: &Path,
    archive_path: &Path,
    format: ArchiveFormat,
    progress: &Progress,
) -> io::Result<()> {
    let root = PathBuf::from(directory.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "staged directory has no name")
    })?);

    let pb = progress.bytes(&format!("Compressing {}", root.display()), scan_size(directory));
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_path)?;
    let mut builder = tar::Builder::new(Encoder::new(format, BufWriter::new(file))?);
    builder.follow_symlinks(false);

    let manifest = directory.join(MANIFEST_FILE);
    if manifest.is_file() {
        builder.append_path_with_name(&manifest, root.join(MANIFEST_FILE))?;
    }

    for entry in WalkDir::new(directory).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(directory).unwrap_or(entry.path());
        if relative == Path::new(MANIFEST_FILE) {
            continue;
        }
        let name = if relative.as_os_str().is_empty() {
            root.clone()
        } else {
            root.join(relative)
        };

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &name)?;
            if entry.file_type().is_file() {
                pb.inc(entry.metadata()?.len());
            }
        }
        debug!("Archived {}", name.display());
    }

    let writer = builder.into_inner()?.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    pb.finish_and_clear();
    Ok(())
}

struct Opened {
    reader: Box<dyn Read>,
    failed: Rc<Cell<bool>>,
    pb: ProgressBar,
}

fn open_archive(archive: &Path, progress: &Progress) -> Result<Opened> {
    let format = ArchiveFormat::from_path(archive)
        .ok_or_else(|| RescueError::NotABackup(archive.to_path_buf()))?;
    let file = match fs::File::open(archive) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RescueError::SourceNotFound(archive.to_path_buf()));
        }
        Err(e) => return Err(extraction_failed(archive, e)),
    };
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let pb = progress.bytes(&format!("Extracting {}", archive.display()), size);
    let reader = BufReader::new(pb.wrap_read(file));

    let decoder: Box<dyn Read> = match format {
        ArchiveFormat::Xz => Box::new(XzDecoder::new(reader)),
        ArchiveFormat::Gz => Box::new(GzDecoder::new(reader)),
        ArchiveFormat::Zst => Box::new(
            zstd::stream::read::Decoder::with_buffer(reader)
                .map_err(|e| corrupt(archive, e.to_string()))?,
        ),
    };

    let failed = Rc::new(Cell::new(false));
    let tracked = Tracked {
        inner: decoder,
        failed: failed.clone(),
    };
    Ok(Opened {
        reader: Box::new(tracked),
        failed,
        pb,
    })
}

/// Read the manifest stored as the archive's first entry, if present.
pub fn read_manifest(archive: &Path) -> Result<Option<Manifest>> {
    let opened = open_archive(archive, &Progress::hidden())?;
    let mut tar = tar::Archive::new(opened.reader);
    let mut entries = tar.entries().map_err(|e| corrupt(archive, e.to_string()))?;

    let Some(first) = entries.next() else {
        return Ok(None);
    };
    let entry = first.map_err(|e| corrupt(archive, e.to_string()))?;
    let path = entry.path().map_err(|e| corrupt(archive, e.to_string()))?.into_owned();

    let is_manifest =
        path.components().count() == 2 && path.file_name() == Some(OsStr::new(MANIFEST_FILE));
    if !is_manifest {
        return Ok(None);
    }
    Manifest::from_reader(entry, archive).map(Some)
}

/// Where an archive entry is unpacked. `path` must lie under `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub root: PathBuf,
    pub path: PathBuf,
}

impl Placement {
    pub fn new(root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path: path.into(),
        }
    }

    /// Fail if `path` escapes `root`, or if a component between them is
    /// already a symlink on disk. The final component only counts for
    /// directories: unpack replaces any other node in place.
    fn check_contained(&self, is_dir: bool) -> std::result::Result<(), String> {
        let relative = self.path.strip_prefix(&self.root).map_err(|_| {
            format!("{} is outside {}", self.path.display(), self.root.display())
        })?;

        let components: Vec<Component> = relative.components().collect();
        let checked = if is_dir {
            components.len()
        } else {
            components.len().saturating_sub(1)
        };

        let mut current = self.root.clone();
        for component in &components[..checked] {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    return Err(format!(
                        "{} would be written through symlink {}",
                        self.path.display(),
                        current.display()
                    ));
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        Ok(())
    }
}

/// Extract every entry of `archive` under `destination`.
pub fn extract(archive: &Path, destination: &Path, progress: &Progress) -> Result<u64> {
    fs::create_dir_all(destination).map_err(|e| extraction_failed(archive, e))?;
    extract_with(archive, progress, |relative| {
        Some(Placement::new(destination, destination.join(relative)))
    })
}

/// Extract entries to wherever `resolve` places their archive path; entries
/// it maps to `None` are skipped. Returns the number of entries written.
///
/// Entries with `..` or absolute components, hard links, and placements that
/// would pass through an existing symlink are rejected as corrupt.
pub fn extract_with<F>(archive: &Path, progress: &Progress, mut resolve: F) -> Result<u64>
where
    F: FnMut(&Path) -> Option<Placement>,
{
    info!("Extracting {}", archive.display());

    let Opened { reader, failed, pb } = open_archive(archive, progress)?;
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let mut written = 0u64;
    for entry in tar.entries().map_err(|e| corrupt(archive, e.to_string()))? {
        let mut entry = entry.map_err(|e| corrupt(archive, e.to_string()))?;
        let path = entry.path().map_err(|e| corrupt(archive, e.to_string()))?.into_owned();

        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(corrupt(archive, format!("unsafe entry path {}", path.display())));
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_hard_link() {
            return Err(corrupt(archive, format!("hard link entry {}", path.display())));
        }

        let Some(placement) = resolve(&path) else {
            debug!("Skipping {}", path.display());
            continue;
        };
        placement
            .check_contained(entry_type.is_dir())
            .map_err(|reason| corrupt(archive, reason))?;
        let target = placement.path;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| extraction_failed(archive, e))?;
        }
        entry.unpack(&target).map_err(|e| {
            let decode_error =
                matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof);
            if failed.get() || decode_error {
                corrupt(archive, e.to_string())
            } else {
                extraction_failed(archive, e)
            }
        })?;
        debug!("Extracted {} to {}", path.display(), target.display());
        written += 1;
    }

    pb.finish_and_clear();
    info!("Extracted {} entries from {}", written, archive.display());
    Ok(written)
}

fn corrupt(archive: &Path, reason: String) -> RescueError {
    RescueError::ArchiveCorrupt {
        archive: archive.to_path_buf(),
        reason,
    }
}

fn extraction_failed(archive: &Path, source: io::Error) -> RescueError {
    RescueError::ExtractionFailed {
        archive: archive.to_path_buf(),
        source,
    }
}
