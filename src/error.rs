//! Error taxonomy for backup and restore runs.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RescueError {
    #[error("Application '{0}' not found in registry")]
    UnknownApplication(String),

    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Transfer of {} failed: {source}", path.display())]
    TransferFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archiving {} failed: {source}", path.display())]
    ArchiveFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive {} is corrupt: {reason}", archive.display())]
    ArchiveCorrupt { archive: PathBuf, reason: String },

    #[error("Extraction of {} failed: {source}", archive.display())]
    ExtractionFailed {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Restore of {} failed: {reason}", source_path.display())]
    RestoreFailed { source_path: PathBuf, reason: String },

    #[error("Elevation failed: {0}")]
    ElevationFailed(String),

    #[error("Malformed backup name '{0}', expected <app>_<YYYYMMDD_HHMMSS>")]
    MalformedBackupName(String),

    #[error("Not a backup directory or archive: {}", .0.display())]
    NotABackup(PathBuf),

    #[error("No operation specified. Use -b/--backup or -r/--restore")]
    NoOperation,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RescueError {
    /// Name of the taxonomy bucket, used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownApplication(_) => "UnknownApplication",
            Self::SourceNotFound(_) => "SourceNotFound",
            Self::TransferFailed { .. } => "TransferFailed",
            Self::ArchiveFailed { .. } => "ArchiveFailed",
            Self::ArchiveCorrupt { .. } => "ArchiveCorrupt",
            Self::ExtractionFailed { .. } => "ExtractionFailed",
            Self::RestoreFailed { .. } => "RestoreFailed",
            Self::ElevationFailed(_) => "ElevationFailed",
            Self::MalformedBackupName(_) => "MalformedBackupName",
            Self::NotABackup(_) => "NotABackup",
            Self::NoOperation => "NoOperation",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, RescueError>;
