use crate::error::{RescueError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sentinel identifier that expands to every registered application.
pub const ALL_APPS: &str = "all";

/// One registered application and the paths holding its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationEntry {
    pub name: String,
    pub paths: Vec<PathBuf>,
}

impl ApplicationEntry {
    pub fn new(
        name: impl Into<String>,
        paths: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        Self {
            name: name.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a run should act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    App(String),
}

impl Target {
    pub fn parse(value: &str) -> Self {
        if value == ALL_APPS {
            Target::All
        } else {
            Target::App(value.to_string())
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::All => f.write_str(ALL_APPS),
            Target::App(name) => f.write_str(name),
        }
    }
}

/// Immutable mapping from application identifier to state paths.
///
/// Order is the order entries were supplied in and is preserved by every
/// lookup, including the `all` expansion.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<ApplicationEntry>,
}

impl Registry {
    pub fn new(entries: Vec<ApplicationEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.is_empty() || entry.name == ALL_APPS {
                return Err(RescueError::Config(format!(
                    "invalid application identifier '{}'",
                    entry.name
                )));
            }
            if entry.paths.is_empty() {
                return Err(RescueError::Config(format!(
                    "application '{}' has no paths",
                    entry.name
                )));
            }
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(RescueError::Config(format!(
                    "application '{}' registered twice",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// The applications this tool knows about out of the box.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ApplicationEntry::new(
                    "jellyfin",
                    ["/var/lib/jellyfin", "/etc/jellyfin", "/usr/share/jellyfin"],
                ),
                ApplicationEntry::new("sonarr", ["/var/lib/sonarr"]),
                ApplicationEntry::new("lidarr", ["/var/lib/lidarr"]),
                ApplicationEntry::new("radarr", ["/var/lib/radarr"]),
                ApplicationEntry::new("jellyseerr", ["/var/lib/jellyseerr"]),
                ApplicationEntry::new("jackett", ["/var/lib/jackett"]),
                ApplicationEntry::new("nginx", ["/etc/nginx"]),
            ],
        }
    }

    pub fn entries(&self) -> &[ApplicationEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ApplicationEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Resolve a target to the applications it covers.
    pub fn select(&self, target: &Target) -> Result<Vec<&ApplicationEntry>> {
        match target {
            Target::All => Ok(self.entries.iter().collect()),
            Target::App(name) => self
                .get(name)
                .map(|entry| vec![entry])
                .ok_or_else(|| RescueError::UnknownApplication(name.clone())),
        }
    }

    /// Resolve an identifier (or `all`) to its ordered path list.
    pub fn resolve(&self, identifier: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .select(&Target::parse(identifier))?
            .into_iter()
            .flat_map(|entry| entry.paths.iter().cloned())
            .collect())
    }
}
