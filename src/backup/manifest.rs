//! Staging layout of a backup and the manifest recording it.

use crate::error::{RescueError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = ".rescue-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Subdirectory (or file) name inside the staged directory
    pub name: String,
    /// Live path the entry was copied from and restores to
    pub source: PathBuf,
    #[serde(default)]
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub app: String,
    pub created_at: DateTime<Utc>,
    pub tool_version: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Plan the staging layout for an application's paths.
    ///
    /// Each path is staged under its base name. Later paths sharing a base
    /// name with an earlier one get a `-2`, `-3`, ... suffix.
    pub fn plan(app: &str, paths: &[PathBuf]) -> Self {
        let mut entries: Vec<ManifestEntry> = Vec::with_capacity(paths.len());

        for path in paths {
            let base = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_string());

            let mut name = base.clone();
            let mut n = 1;
            while entries.iter().any(|e| e.name == name) {
                n += 1;
                name = format!("{}-{}", base, n);
            }

            entries.push(ManifestEntry {
                name,
                source: path.clone(),
                bytes: 0,
            });
        }

        Self {
            app: app.to_string(),
            created_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            entries,
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn save(&self, directory: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| RescueError::Config(format!("cannot serialize manifest: {}", e)))?;
        fs::write(directory.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Load the manifest from a staged directory, if it has one.
    pub fn load(directory: &Path) -> Result<Option<Self>> {
        let path = directory.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let file = fs::File::open(&path)?;
        Self::from_reader(file, &path).map(Some)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        serde_json::from_reader(reader).map_err(|e| RescueError::ArchiveCorrupt {
            archive: origin.to_path_buf(),
            reason: format!("unreadable manifest: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_disambiguates_shared_basenames() {
        let paths: Vec<PathBuf> = [
            "/var/lib/jellyfin",
            "/etc/jellyfin",
            "/usr/share/jellyfin",
            "/etc/nginx",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        let manifest = Manifest::plan("jellyfin", &paths);
        let names: Vec<&str> = manifest.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["jellyfin", "jellyfin-2", "jellyfin-3", "nginx"]);
        assert_eq!(
            manifest.entry("jellyfin-2").unwrap().source,
            PathBuf::from("/etc/jellyfin")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());

        let mut manifest = Manifest::plan("sonarr", &[PathBuf::from("/var/lib/sonarr")]);
        manifest.entries[0].bytes = 42;
        manifest.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.app, "sonarr");
        assert_eq!(loaded.entries, manifest.entries);
    }

    #[test]
    fn test_garbage_manifest_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(RescueError::ArchiveCorrupt { .. })
        ));
    }
}
