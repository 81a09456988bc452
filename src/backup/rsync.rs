use crate::error::{RescueError, Result};
use crate::utils::config::Config;
use crate::utils::progress::Progress;
use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_ARGS: [&str; 2] = ["-a", "--info=progress2"];

/// Runs rsync for restores that target a live directory.
pub struct RsyncAdapter {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    progress_regex: Regex,
}

impl RsyncAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            progress_regex: Regex::new(r"(?:^|\s)(\d{1,3})%").expect("progress pattern is valid"),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.rsync_bin.clone(),
            config.rsync_args.clone(),
            config.sync_timeout()?,
        ))
    }

    /// Percentage from an rsync `--info=progress2` line.
    pub fn parse_progress(&self, line: &str) -> Option<u8> {
        self.progress_regex
            .captures(line)
            .and_then(|c| c[1].parse::<u8>().ok())
            .filter(|p| *p <= 100)
    }

    fn command(&self, source: &Path, destination: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        // Trailing slashes sync directory contents rather than nesting the directory
        if source.is_dir() {
            let mut src = OsString::from(source.as_os_str());
            src.push("/");
            let mut dst = OsString::from(destination.as_os_str());
            dst.push("/");
            cmd.arg(src).arg(dst);
        } else {
            cmd.arg(source).arg(destination);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Sync `source` onto `destination` and return rsync's exit status.
    ///
    /// Output is consumed while the child runs; rsync redraws progress with
    /// carriage returns, so both `\r` and `\n` delimit lines.
    pub async fn sync_directory(
        &self,
        source: &Path,
        destination: &Path,
        progress: &Progress,
    ) -> Result<ExitStatus> {
        let failed = |reason: String| RescueError::RestoreFailed {
            source_path: source.to_path_buf(),
            reason,
        };

        let parent = if source.is_dir() {
            Some(destination)
        } else {
            destination.parent()
        };
        if let Some(dir) = parent {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut cmd = self.command(source, destination);
        debug!("Running rsync command: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| failed(format!("cannot start {}: {}", self.program, e)))?;
        let stdout = child.stdout.take().ok_or_else(|| failed("stdout not captured".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| failed("stderr not captured".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut errors = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("rsync stderr: {}", line);
                errors.push(line);
            }
            errors
        });

        let pb = progress.percent(&format!("Restoring {}", destination.display()));
        let run = async {
            let mut segments = BufReader::new(stdout).split(b'\r');
            while let Some(segment) = segments.next_segment().await? {
                for line in String::from_utf8_lossy(&segment).lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("rsync: {}", line);
                    if let Some(percent) = self.parse_progress(line) {
                        pb.set_position(percent as u64);
                    }
                }
            }
            child.wait().await
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let status = match outcome {
            Some(result) => result.map_err(|e| failed(format!("waiting for rsync: {}", e)))?,
            None => {
                let _ = child.kill().await;
                pb.abandon();
                return Err(failed(format!(
                    "timed out after {}",
                    humantime::format_duration(self.timeout.unwrap_or_default())
                )));
            }
        };

        let errors = stderr_task.await.unwrap_or_default();
        pb.finish_and_clear();

        if status.success() {
            info!("Restored {} to {}", source.display(), destination.display());
        } else if let Some(last) = errors.last() {
            warn!("rsync exited with {}: {}", status, last);
        }
        Ok(status)
    }

    /// Version line reported by the configured rsync binary.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await?;

        if !output.status.success() {
            return Err(RescueError::RestoreFailed {
                source_path: self.program.clone().into(),
                reason: "rsync not found".to_string(),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout);
        Ok(version.lines().next().unwrap_or("unknown").to_string())
    }
}

impl Default for RsyncAdapter {
    fn default() -> Self {
        Self::new("rsync", DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(), None)
    }
}
