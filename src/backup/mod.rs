pub mod archive;
pub mod manager;
pub mod manifest;
pub mod naming;
pub mod registry;
pub mod rsync;
pub mod transfer;

pub use manager::BackupManager;
pub use naming::{ArchiveFormat, BackupName};
pub use registry::{ApplicationEntry, Registry, Target};

use crate::error::RescueError;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Backup,
    /// Restore from a staged directory, an archive, or (with `all`) a
    /// directory of backups. `None` means the session's backup directory.
    Restore { source: Option<PathBuf> },
}

/// One invocation of the tool.
#[derive(Debug, Clone)]
pub struct BackupSession {
    pub operation: Operation,
    /// `None` means every application for a backup, or the application
    /// named by the backup itself for a restore
    pub target: Option<Target>,
    pub backup_dir: PathBuf,
    pub archive: bool,
    pub format: ArchiveFormat,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    CompletedWithErrors,
    Aborted,
}

impl RunState {
    pub fn exit_code(self) -> u8 {
        match self {
            RunState::Completed => 0,
            RunState::CompletedWithErrors => 1,
            RunState::Aborted => 2,
        }
    }
}

/// A failure scoped to one path, application or backup entry.
#[derive(Debug)]
pub struct BackupError {
    pub scope: String,
    pub error: RescueError,
    pub timestamp: i64,
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.error.kind(), self.scope, self.error)
    }
}

/// Outcome of a run that got past its preconditions.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Staged directories or archives written, or backups restored
    pub outputs: Vec<PathBuf>,
    pub errors: Vec<BackupError>,
}

impl RunReport {
    pub fn fail(&mut self, scope: impl Into<String>, error: RescueError) {
        self.errors.push(BackupError {
            scope: scope.into(),
            error,
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    pub fn state(&self) -> RunState {
        if self.errors.is_empty() {
            RunState::Completed
        } else {
            RunState::CompletedWithErrors
        }
    }
}
