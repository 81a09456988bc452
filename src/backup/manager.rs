use super::manifest::{Manifest, MANIFEST_FILE};
use super::naming::{ArchiveFormat, BackupName};
use super::registry::{ApplicationEntry, Registry, Target};
use super::rsync::RsyncAdapter;
use super::archive::{self, Placement};
use super::{transfer, BackupSession, Operation, RunReport};
use crate::error::{RescueError, Result};
use crate::utils::progress::Progress;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Sequences backups and restores over an injected registry.
pub struct BackupManager {
    registry: Registry,
    rsync: RsyncAdapter,
    progress: Progress,
}

impl BackupManager {
    pub fn new(registry: Registry, rsync: RsyncAdapter, progress: Progress) -> Self {
        Self {
            registry,
            rsync,
            progress,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run a session to completion.
    ///
    /// `Err` means the run was aborted on a precondition before anything was
    /// written. Failures after that point are collected in the report.
    pub async fn run(&self, session: &BackupSession) -> Result<RunReport> {
        match &session.operation {
            Operation::Backup => self.backup(session),
            Operation::Restore { source } => {
                let source = source.as_deref().unwrap_or(&session.backup_dir);
                self.restore(source, session.target.as_ref(), session.verbose).await
            }
        }
    }

    pub fn backup(&self, session: &BackupSession) -> Result<RunReport> {
        let target = session.target.clone().unwrap_or(Target::All);
        let apps = self.registry.select(&target)?;

        fs::create_dir_all(&session.backup_dir)?;

        let mut report = RunReport::default();
        for app in apps {
            self.backup_app(app, session, &mut report);
        }
        Ok(report)
    }

    fn backup_app(&self, app: &ApplicationEntry, session: &BackupSession, report: &mut RunReport) {
        let errors_before = report.errors.len();
        let name = BackupName::now(&app.name);

        let staged = match create_backup_directory(&session.backup_dir, &name) {
            Ok(staged) => staged,
            Err(e) => {
                error!("Cannot create backup directory for {}: {}", app.name, e);
                report.fail(&app.name, e);
                return;
            }
        };
        if session.verbose {
            info!("Created dir {}", staged.display());
        }

        let planned = Manifest::plan(&app.name, &app.paths);
        let mut manifest = Manifest {
            entries: Vec::with_capacity(planned.entries.len()),
            ..planned.clone()
        };

        for mut entry in planned.entries {
            match transfer::copy_tree(&entry.source, &staged.join(&entry.name), &self.progress) {
                Ok(bytes) => {
                    entry.bytes = bytes;
                    manifest.entries.push(entry);
                }
                Err(e) => {
                    error!("{}: {}", app.name, e);
                    report.fail(format!("{} ({})", app.name, entry.source.display()), e);
                }
            }
        }

        if let Err(e) = manifest.save(&staged) {
            warn!("Could not write manifest for {}: {}", staged.display(), e);
        }

        let output = if session.archive {
            match archive::compress(&staged, session.format, &self.progress) {
                Ok(archive) => archive,
                Err(e) => {
                    error!("{}: {}", app.name, e);
                    report.fail(&app.name, e);
                    staged
                }
            }
        } else {
            staged
        };
        report.outputs.push(output);

        let failed = report.errors.len() - errors_before;
        if failed == 0 {
            info!("Backup completed for {}.", app.name);
        } else {
            warn!("Backup completed for {} with {} error(s).", app.name, failed);
        }
    }

    pub async fn restore(
        &self,
        source: &Path,
        target: Option<&Target>,
        verbose: bool,
    ) -> Result<RunReport> {
        if fs::symlink_metadata(source).is_err() {
            return Err(RescueError::SourceNotFound(source.to_path_buf()));
        }

        let mut report = RunReport::default();
        match target {
            Some(Target::All) => self.restore_all(source, verbose, &mut report).await?,
            Some(Target::App(name)) => {
                let app = self
                    .registry
                    .get(name)
                    .ok_or_else(|| RescueError::UnknownApplication(name.clone()))?;
                self.restore_entry(source, app, verbose, &mut report).await;
            }
            None => {
                let (name, _) = BackupName::from_path(source)?;
                let app = self
                    .registry
                    .get(&name.app)
                    .ok_or_else(|| RescueError::UnknownApplication(name.app.clone()))?;
                self.restore_entry(source, app, verbose, &mut report).await;
            }
        }
        Ok(report)
    }

    /// Restore every backup found directly under `base`, oldest first, so the
    /// newest backup of each application is applied last.
    async fn restore_all(&self, base: &Path, verbose: bool, report: &mut RunReport) -> Result<()> {
        if !base.is_dir() {
            return Err(RescueError::NotABackup(base.to_path_buf()));
        }

        let mut backups: Vec<(BackupName, PathBuf)> = Vec::new();
        for entry in fs::read_dir(base)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if hidden {
                continue;
            }
            match BackupName::from_path(&path) {
                Ok((name, _)) => backups.push((name, path)),
                Err(e) => {
                    error!("{}", e);
                    report.fail(path.display().to_string(), e);
                }
            }
        }
        backups.sort_by(|a, b| {
            a.0.timestamp
                .cmp(&b.0.timestamp)
                .then_with(|| a.0.app.cmp(&b.0.app))
        });
        info!("Found {} backups in {}", backups.len(), base.display());

        for (name, path) in backups {
            match self.registry.get(&name.app) {
                Some(app) => self.restore_entry(&path, app, verbose, report).await,
                None => {
                    let e = RescueError::UnknownApplication(name.app.clone());
                    error!("{}: {}", path.display(), e);
                    report.fail(path.display().to_string(), e);
                }
            }
        }
        Ok(())
    }

    async fn restore_entry(
        &self,
        path: &Path,
        app: &ApplicationEntry,
        verbose: bool,
        report: &mut RunReport,
    ) {
        info!("Restoring {} from {}", app.name, path.display());

        let result = if ArchiveFormat::from_path(path).is_some() {
            self.restore_archive(path, app)
        } else if path.is_dir() {
            self.restore_directory(path, app, verbose, report).await
        } else {
            Err(RescueError::NotABackup(path.to_path_buf()))
        };

        match result {
            Ok(()) => report.outputs.push(path.to_path_buf()),
            Err(e) => {
                error!("{}: {}", app.name, e);
                report.fail(format!("{} ({})", app.name, path.display()), e);
            }
        }
    }

    fn restore_archive(&self, archive_path: &Path, app: &ApplicationEntry) -> Result<()> {
        let manifest = match archive::read_manifest(archive_path)? {
            Some(manifest) => manifest,
            None => {
                debug!("{} has no manifest, using registry layout", archive_path.display());
                Manifest::plan(&app.name, &app.paths)
            }
        };

        archive::extract_with(archive_path, &self.progress, |entry| live_target(&manifest, entry))?;
        info!("Restored {} from {}", app.name, archive_path.display());
        Ok(())
    }

    /// Sync each staged entry back onto its live path. Entries fail
    /// independently; an error is returned only when nothing could be matched.
    async fn restore_directory(
        &self,
        staged: &Path,
        app: &ApplicationEntry,
        verbose: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        let manifest = match Manifest::load(staged)? {
            Some(manifest) => manifest,
            None => {
                debug!("{} has no manifest, using registry layout", staged.display());
                Manifest::plan(&app.name, &app.paths)
            }
        };

        if verbose {
            match self.rsync.version().await {
                Ok(version) => info!("Using {}", version),
                Err(e) => warn!("Could not query rsync version: {}", e),
            }
        }

        let mut matched = 0;
        for entry in &manifest.entries {
            let source = staged.join(&entry.name);
            if fs::symlink_metadata(&source).is_err() {
                warn!("{} holds no copy of {}", staged.display(), entry.source.display());
                continue;
            }
            matched += 1;

            let synced = self
                .rsync
                .sync_directory(&source, &entry.source, &self.progress)
                .await;
            let result = match synced {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(RescueError::RestoreFailed {
                    source_path: source.clone(),
                    reason: format!("rsync exited with {}", status),
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!("{}: {}", app.name, e);
                report.fail(format!("{} ({})", app.name, entry.source.display()), e);
            }
        }

        if matched == 0 {
            return Err(RescueError::NotABackup(staged.to_path_buf()));
        }
        Ok(())
    }
}

/// Create the timestamped staging directory. Pre-existence is not an error.
pub fn create_backup_directory(base: &Path, name: &BackupName) -> Result<PathBuf> {
    let directory = base.join(name.to_string());
    fs::create_dir_all(&directory)?;
    debug!("Created dir {}", directory.display());
    Ok(directory)
}

/// Map an archive entry path `<staged>/<name>/<rest>` onto the live path
/// recorded for `<name>`, which also bounds where the entry may land.
fn live_target(manifest: &Manifest, entry: &Path) -> Option<Placement> {
    let mut components = entry.components();
    components.next()?;
    let name = components.next()?.as_os_str().to_str()?;
    if name == MANIFEST_FILE {
        return None;
    }
    let source = &manifest.entry(name)?.source;
    let rest = components.as_path();
    let path = if rest.as_os_str().is_empty() {
        source.clone()
    } else {
        source.join(rest)
    };
    Some(Placement::new(source, path))
}
