//! CLI argument parsing

use crate::backup::{ArchiveFormat, BackupSession, Operation, Target};
use crate::error::RescueError;
use crate::utils::config::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "idontexist-rescue")]
#[command(
    author,
    version,
    about = "Backup and restore utility for application directories.",
    long_about = None
)]
pub struct Cli {
    /// Perform a backup (implied by --app without --restore)
    #[arg(short, long)]
    pub backup: bool,

    /// Restore from a backup directory or archive; with --app all, a directory
    /// of backups. Without PATH the backup directory (-d) is used
    #[arg(short, long, value_name = "PATH", num_args = 0..=1)]
    pub restore: Option<Option<PathBuf>>,

    /// Application to back up or restore, or 'all'
    #[arg(short, long, value_name = "NAME|all")]
    pub app: Option<String>,

    /// Base directory for backups [default: ./idontexist-backups]
    #[arg(short = 'd', long, value_name = "PATH", visible_alias = "directory")]
    pub backup_dir: Option<PathBuf>,

    /// Compress the staged backup and delete the uncompressed copy
    #[arg(short, long)]
    pub tar: bool,

    /// Compression used with --tar
    #[arg(long, value_enum)]
    pub format: Option<ArchiveFormat>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "RESCUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Do not check for or acquire root privileges
    #[arg(long)]
    pub skip_elevation: bool,

    /// List registered applications and exit
    #[arg(short, long)]
    pub list: bool,
}

impl Cli {
    /// Build the session for this invocation, CLI flags overriding `config`.
    pub fn session(&self, config: &Config) -> Result<BackupSession, RescueError> {
        let operation = match (&self.restore, self.backup || self.app.is_some()) {
            (Some(source), _) => Operation::Restore {
                source: source.clone(),
            },
            (None, true) => Operation::Backup,
            (None, false) => return Err(RescueError::NoOperation),
        };

        Ok(BackupSession {
            operation,
            target: self.app.as_deref().map(Target::parse),
            backup_dir: self.backup_dir.clone().unwrap_or_else(|| config.backup_dir.clone()),
            archive: self.tar,
            format: self.format.unwrap_or(config.archive_format),
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("idontexist-rescue").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_app_implies_backup() {
        let session = parse(&["--app", "jellyfin", "--backup-dir", "/tmp/b"])
            .session(&Config::default())
            .unwrap();
        assert_eq!(session.operation, Operation::Backup);
        assert_eq!(session.target, Some(Target::App("jellyfin".to_string())));
        assert_eq!(session.backup_dir, PathBuf::from("/tmp/b"));
        assert!(!session.archive);
    }

    #[test]
    fn test_backup_defaults() {
        let session = parse(&["-b", "-t"]).session(&Config::default()).unwrap();
        assert_eq!(session.target, None);
        assert_eq!(session.backup_dir, PathBuf::from("idontexist-backups"));
        assert!(session.archive);
        assert_eq!(session.format, ArchiveFormat::Xz);
    }

    #[test]
    fn test_restore_wins() {
        let session = parse(&[
            "--restore",
            "/tmp/b/sonarr_20240101_000000.tar.xz",
            "--app",
            "all",
            "--format",
            "zst",
        ])
        .session(&Config::default())
        .unwrap();
        assert_eq!(
            session.operation,
            Operation::Restore {
                source: Some(PathBuf::from("/tmp/b/sonarr_20240101_000000.tar.xz"))
            }
        );
        assert_eq!(session.target, Some(Target::All));
        assert_eq!(session.format, ArchiveFormat::Zst);
    }

    #[test]
    fn test_no_operation() {
        let err = parse(&["--verbose"]).session(&Config::default()).unwrap_err();
        assert!(matches!(err, RescueError::NoOperation));
    }

    #[test]
    fn test_directory_alias() {
        let cli = parse(&["-b", "--directory", "/srv/b"]);
        assert_eq!(cli.backup_dir, Some(PathBuf::from("/srv/b")));
    }

    #[test]
    fn test_restore_without_path_uses_backup_dir() {
        let session = parse(&["-r", "-a", "all", "-d", "/srv/b"])
            .session(&Config::default())
            .unwrap();
        assert_eq!(session.operation, Operation::Restore { source: None });
        assert_eq!(session.target, Some(Target::All));
        assert_eq!(session.backup_dir, PathBuf::from("/srv/b"));
    }
}
