//! Root check performed once at startup.

use crate::error::{RescueError, Result};
use crate::utils::config::{CONFIG_ENV, ENV_PREFIX};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tracing::{debug, info};

/// Set in the environment of the re-executed process so a failed `sudo`
/// cannot loop.
pub const ELEVATED_ENV: &str = "RESCUE_ELEVATED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationPolicy {
    /// Re-run through sudo when not root
    #[default]
    Sudo,
    /// Fail unless already root
    Require,
    /// Do not check
    Skip,
}

#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

/// Proceed if the process may touch system-owned paths.
///
/// Under [`ElevationPolicy::Sudo`] this does not return on success: the
/// process image is replaced by `sudo env ... <exe> <original args>`, with
/// `config_file` forwarded so the elevated run sees the same configuration.
pub fn ensure_elevated(policy: ElevationPolicy, config_file: Option<&Path>) -> Result<()> {
    if policy == ElevationPolicy::Skip {
        debug!("Skipping privilege check");
        return Ok(());
    }
    if is_elevated() {
        return Ok(());
    }

    match policy {
        ElevationPolicy::Skip => Ok(()),
        ElevationPolicy::Require => Err(RescueError::ElevationFailed(
            "root privileges are required".to_string(),
        )),
        ElevationPolicy::Sudo => {
            if std::env::var_os(ELEVATED_ENV).is_some() {
                return Err(RescueError::ElevationFailed(
                    "still not root after re-running with sudo".to_string(),
                ));
            }
            reexec_with_sudo(config_file)
        }
    }
}

/// Arguments to `sudo` that re-run `exe` with `args` as root.
///
/// sudo resets the environment and HOME, so the resolved config file and the
/// `RESCUE_*` and `RUST_LOG` variables from `vars` are passed through `env`.
pub fn sudo_args(
    exe: &Path,
    args: &[OsString],
    config_file: Option<&Path>,
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> Vec<OsString> {
    let mut argv = vec![OsString::from("env"), assignment(ELEVATED_ENV, "1")];

    for (key, value) in vars {
        let Some(name) = key.to_str() else {
            continue;
        };
        let ours = name
            .strip_prefix(ENV_PREFIX)
            .is_some_and(|rest| rest.starts_with('_'));
        if (ours || name == "RUST_LOG") && name != ELEVATED_ENV && name != CONFIG_ENV {
            argv.push(assignment(name, value));
        }
    }
    if let Some(path) = config_file {
        argv.push(assignment(CONFIG_ENV, path));
    }

    argv.push(exe.as_os_str().to_os_string());
    argv.extend(args.iter().cloned());
    argv
}

fn assignment(name: &str, value: impl AsRef<OsStr>) -> OsString {
    let mut pair = OsString::from(name);
    pair.push("=");
    pair.push(value);
    pair
}

#[cfg(unix)]
fn reexec_with_sudo(config_file: Option<&Path>) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()
        .map_err(|e| RescueError::ElevationFailed(format!("cannot locate executable: {}", e)))?;
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let argv = sudo_args(&exe, &args, config_file, std::env::vars_os());

    info!("Requires root. Re-running with sudo...");
    debug!("Sudo command: sudo {:?}", argv);

    let err = std::process::Command::new("sudo").args(&argv).exec();
    Err(RescueError::ElevationFailed(format!("sudo execution failed: {}", err)))
}

#[cfg(not(unix))]
fn reexec_with_sudo(_config_file: Option<&Path>) -> Result<()> {
    Err(RescueError::ElevationFailed(
        "re-running with elevation is only supported on unix".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_always_passes() {
        assert!(ensure_elevated(ElevationPolicy::Skip, None).is_ok());
    }

    #[test]
    fn test_require_matches_euid() {
        let result = ensure_elevated(ElevationPolicy::Require, None);
        if is_elevated() {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(RescueError::ElevationFailed(_))));
        }
    }

    #[test]
    fn test_sudo_args_forward_config_and_environment() {
        let vars = [
            ("RESCUE_BACKUP_DIR", "/srv/backups"),
            ("RESCUE_CONFIG", "relative.toml"),
            ("RESCUE_ELEVATED", "0"),
            ("RUST_LOG", "debug"),
            ("HOME", "/home/media"),
            ("RESCUEX", "nope"),
        ]
        .into_iter()
        .map(|(k, v)| (OsString::from(k), OsString::from(v)));
        let args = [OsString::from("--app"), OsString::from("grafana")];

        let argv = sudo_args(
            Path::new("/usr/local/bin/idontexist-rescue"),
            &args,
            Some(Path::new("/home/media/.config/idontexist-rescue/config.toml")),
            vars,
        );

        let expected: Vec<OsString> = [
            "env",
            "RESCUE_ELEVATED=1",
            "RESCUE_BACKUP_DIR=/srv/backups",
            "RUST_LOG=debug",
            "RESCUE_CONFIG=/home/media/.config/idontexist-rescue/config.toml",
            "/usr/local/bin/idontexist-rescue",
            "--app",
            "grafana",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        assert_eq!(argv, expected);
    }

    #[test]
    fn test_sudo_args_without_config_file() {
        let argv = sudo_args(
            Path::new("/bin/rescue"),
            &[OsString::from("-b")],
            None,
            Vec::<(OsString, OsString)>::new(),
        );
        let expected: Vec<OsString> = ["env", "RESCUE_ELEVATED=1", "/bin/rescue", "-b"]
            .into_iter()
            .map(OsString::from)
            .collect();
        assert_eq!(argv, expected);
    }
}
