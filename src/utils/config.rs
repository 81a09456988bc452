use crate::backup::naming::ArchiveFormat;
use crate::backup::registry::{ApplicationEntry, Registry};
use crate::backup::rsync::DEFAULT_ARGS;
use crate::error::RescueError;
use crate::utils::logging::LogFormat;
use crate::utils::privilege::ElevationPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "RESCUE";
pub const CONFIG_ENV: &str = "RESCUE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory holding every backup
    pub backup_dir: PathBuf,

    /// Compression used when archiving
    pub archive_format: ArchiveFormat,

    /// Sync tool used for directory restores
    pub rsync_bin: String,

    /// Arguments passed to the sync tool before source and destination
    pub rsync_args: Vec<String>,

    /// Upper bound on a single rsync run, humantime syntax ("30m", "2h")
    pub sync_timeout: Option<String>,

    /// How to obtain root
    pub elevation: ElevationPolicy,

    pub log_level: String,

    pub log_format: LogFormat,

    /// Application registry; empty means the built-in table
    pub apps: Vec<ApplicationEntry>,

    /// File this config was read from, if any
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("idontexist-backups"),
            archive_format: ArchiveFormat::Xz,
            rsync_bin: "rsync".to_string(),
            rsync_args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            sync_timeout: None,
            elevation: ElevationPolicy::Sudo,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            apps: Vec::new(),
            loaded_from: None,
        }
    }
}

impl Config {
    /// Load config from defaults, an optional TOML file and `RESCUE_*`
    /// environment variables, later sources winning.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let file = match explicit {
            Some(path) => Some((path.to_path_buf(), true)),
            None => std::env::var_os(CONFIG_ENV)
                .map(|p| (PathBuf::from(p), true))
                .or_else(|| default_config_path().map(|p| (p, false))),
        };

        let mut builder = ::config::Config::builder();
        if let Some((path, required)) = &file {
            builder = builder.add_source(
                ::config::File::from(path.as_path())
                    .format(::config::FileFormat::Toml)
                    .required(*required),
            );
        }
        builder = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let mut config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.loaded_from = file
            .map(|(path, _)| path)
            .filter(|path| path.is_file())
            .map(|path| path.canonicalize().unwrap_or(path));

        config.sync_timeout()?;
        Ok(config)
    }

    pub fn sync_timeout(&self) -> std::result::Result<Option<Duration>, RescueError> {
        self.sync_timeout
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw)
                    .map_err(|e| RescueError::Config(format!("sync_timeout '{}': {}", raw, e)))
            })
            .transpose()
    }

    pub fn registry(&self) -> std::result::Result<Registry, RescueError> {
        if self.apps.is_empty() {
            Ok(Registry::builtin())
        } else {
            Registry::new(self.apps.clone())
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("idontexist-rescue").join("config.toml"))
}
