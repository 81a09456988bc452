//! Typed names for staged directories and archives.
//!
//! A backup is named `<app>_<YYYYMMDD_HHMMSS>`, optionally followed by an
//! archive suffix. The timestamp has a fixed width, so parsing splits from the
//! right and application identifiers may themselves contain underscores.

use crate::error::{RescueError, Result};
use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Compression applied to an archived backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// LZMA via xz, best ratio
    #[default]
    Xz,
    /// gzip
    Gz,
    /// zstandard
    Zst,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Xz, ArchiveFormat::Gz, ArchiveFormat::Zst];

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Xz => ".tar.xz",
            ArchiveFormat::Gz => ".tar.gz",
            ArchiveFormat::Zst => ".tar.zst",
        }
    }

    /// Detect the format from a file name suffix.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::ALL.into_iter().find(|f| name.ends_with(f.extension()))
    }

    /// Path of the archive produced from a staged directory.
    pub fn archive_path(self, directory: &Path) -> PathBuf {
        let mut name = directory
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(self.extension());
        directory.with_file_name(name)
    }
}

/// `{application, timestamp}` record serialized into a backup's file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackupName {
    pub app: String,
    pub timestamp: NaiveDateTime,
}

impl BackupName {
    pub fn new(app: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        // Second resolution is all the name can carry
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            app: app.into(),
            timestamp,
        }
    }

    pub fn now(app: impl Into<String>) -> Self {
        Self::new(app, Local::now().naive_local())
    }

    /// Parse a bare name (no archive suffix).
    pub fn parse(name: &str) -> Result<Self> {
        let malformed = || RescueError::MalformedBackupName(name.to_string());

        if !name.is_char_boundary(name.len().saturating_sub(TIMESTAMP_LEN)) {
            return Err(malformed());
        }
        let (prefix, stamp) = name.split_at(name.len().saturating_sub(TIMESTAMP_LEN));
        let app = prefix.strip_suffix('_').ok_or_else(malformed)?;
        if app.is_empty() || stamp.len() != TIMESTAMP_LEN {
            return Err(malformed());
        }

        let timestamp =
            NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|_| malformed())?;
        Ok(Self {
            app: app.to_string(),
            timestamp,
        })
    }

    /// Parse the final component of a staged directory or archive path.
    pub fn from_path(path: &Path) -> Result<(Self, Option<ArchiveFormat>)> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RescueError::MalformedBackupName(path.display().to_string()))?;

        match ArchiveFormat::from_path(path) {
            Some(format) => {
                let stem = &file_name[..file_name.len() - format.extension().len()];
                Ok((Self::parse(stem)?, Some(format)))
            }
            None => Ok((Self::parse(file_name)?, None)),
        }
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.app, self.timestamp.format(TIMESTAMP_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_display_format() {
        let name = BackupName::new("jellyfin", stamp());
        assert_eq!(name.to_string(), "jellyfin_20240309_140507");
    }

    #[test]
    fn test_parse_with_underscored_app() {
        let name = BackupName::parse("my_app_20240309_140507").unwrap();
        assert_eq!(name.app, "my_app");
        assert_eq!(name.timestamp, stamp());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "jellyfin",
            "jellyfin_2024",
            "_20240309_140507",
            "jellyfin20240309_140507",
            "jellyfin_20241309_140507",
            "jellyfin_2024030x_140507",
            "",
            "é_20240309_14050",
        ] {
            assert!(
                matches!(BackupName::parse(bad), Err(RescueError::MalformedBackupName(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn test_from_path_detects_archive() {
        let (name, format) =
            BackupName::from_path(Path::new("/tmp/b/sonarr_20240309_140507.tar.xz")).unwrap();
        assert_eq!(name.app, "sonarr");
        assert_eq!(format, Some(ArchiveFormat::Xz));

        let (name, format) =
            BackupName::from_path(Path::new("/tmp/b/nginx_20240309_140507")).unwrap();
        assert_eq!(name.app, "nginx");
        assert_eq!(format, None);
    }

    #[test]
    fn test_archive_path() {
        let dir = Path::new("/tmp/b/jellyfin_20240309_140507");
        assert_eq!(
            ArchiveFormat::Zst.archive_path(dir),
            PathBuf::from("/tmp/b/jellyfin_20240309_140507.tar.zst")
        );
    }

    proptest! {
        #[test]
        fn prop_name_survives_formatting(
            app in "[a-z][a-z0-9_-]{0,20}",
            secs in 0i64..4_000_000_000,
        ) {
            let timestamp = chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
            let name = BackupName::new(app.clone(), timestamp);
            let parsed = BackupName::parse(&name.to_string()).unwrap();
            prop_assert_eq!(parsed.app, app);
            prop_assert_eq!(parsed.timestamp, timestamp);
        }
    }
}
