//! Appcenter CLI adapter
//!
//! Wraps the external `appcenter-cli` binary: package installation, app
//! start/stop/uninstall, and installed-app queries via `list`. A missing
//! binary is not fatal; the controller degrades to tracking containers
//! without installing anything.

use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{Result, WatchcowError};

/// Well-known locations probed before falling back to `$PATH`.
const WELL_KNOWN_PATHS: &[&str] = &[
    "/var/apps/appcenter/target/bin/appcenter-cli",
    "/usr/bin/appcenter-cli",
    "/usr/local/bin/appcenter-cli",
];

const CLI_NAME: &str = "appcenter-cli";

/// Handle to the appcenter CLI.
#[derive(Debug, Clone)]
pub struct Installer {
    cli_path: PathBuf,
}

impl Installer {
    /// Locates the appcenter CLI. Returns an error when the binary cannot
    /// be found anywhere; callers treat that as "run without installing".
    pub fn discover() -> Result<Self> {
        let cli_path = find_cli()?;
        Ok(Self { cli_path })
    }

    #[cfg(test)]
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            cli_path: path.into(),
        }
    }

    pub fn cli_path(&self) -> &Path {
        &self.cli_path
    }

    /// Installs the package in `package_dir` via `install-local`, which
    /// reads the package from its working directory.
    pub async fn install_local(&self, package_dir: &Path) -> Result<()> {
        tracing::info!(package_dir = %package_dir.display(), "Installing app package");

        let status = Command::new(&self.cli_path)
            .arg("install-local")
            .current_dir(package_dir)
            .status()
            .await
            .map_err(|e| WatchcowError::Installer(format!("failed to run install-local: {}", e)))?;

        if !status.success() {
            return Err(WatchcowError::Installer(format!(
                "install-local exited with {}",
                status
            )));
        }

        tracing::info!("App package installed");
        Ok(())
    }

    /// Starts an installed app.
    pub async fn start(&self, app_name: &str) -> Result<()> {
        tracing::info!(app = app_name, "Starting app");
        self.run_simple("start", app_name).await
    }

    /// Stops an installed app.
    pub async fn stop(&self, app_name: &str) -> Result<()> {
        tracing::info!(app = app_name, "Stopping app");
        self.run_simple("stop", app_name).await
    }

    /// Uninstalls an app. Deliberately permissive: the app is stopped
    /// first, and an uninstall failure is logged and swallowed so destroy
    /// bookkeeping never blocks on the appcenter.
    pub async fn uninstall(&self, app_name: &str) -> Result<()> {
        tracing::info!(app = app_name, "Uninstalling app");

        // Stop errors are expected when the app never started
        let _ = self.run_simple("stop", app_name).await;

        match self.run_simple("uninstall", app_name).await {
            Ok(()) => {
                tracing::info!(app = app_name, "App uninstalled");
            }
            Err(e) => {
                tracing::warn!(
                    app = app_name,
                    error = %e,
                    "Could not uninstall app automatically, it may need manual removal from the app center"
                );
            }
        }
        Ok(())
    }

    /// Checks whether an app is installed by parsing `list` output. Rows of
    /// the table start with the box-drawing `│`; the first column is the
    /// app name.
    pub async fn is_installed(&self, app_name: &str) -> bool {
        let output = match Command::new(&self.cli_path).arg("list").output().await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::debug!(status = %output.status, "appcenter-cli list failed");
                return false;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to run appcenter-cli list");
                return false;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_installed(&stdout, app_name)
    }

    async fn run_simple(&self, subcommand: &str, app_name: &str) -> Result<()> {
        let status = Command::new(&self.cli_path)
            .arg(subcommand)
            .arg(app_name)
            .status()
            .await
            .map_err(|e| {
                WatchcowError::Installer(format!("failed to run {}: {}", subcommand, e))
            })?;

        if !status.success() {
            return Err(WatchcowError::Installer(format!(
                "{} {} exited with {}",
                subcommand, app_name, status
            )));
        }
        Ok(())
    }
}

/// Scans `list` output for an app name in the first table column.
fn parse_installed(output: &str, app_name: &str) -> bool {
    for line in output.lines() {
        if !line.starts_with('│') {
            continue;
        }
        let mut columns = line.split('│');
        columns.next(); // leading empty segment before the first delimiter
        if let Some(first) = columns.next() {
            if first.trim() == app_name {
                return true;
            }
        }
    }
    false
}

/// Locates the CLI binary: well-known paths, then `$PATH`, then `which`.
fn find_cli() -> Result<PathBuf> {
    for p in WELL_KNOWN_PATHS {
        let path = Path::new(p);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Found appcenter-cli");
            return Ok(path.to_path_buf());
        }
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(CLI_NAME);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "Found appcenter-cli in PATH");
                return Ok(candidate);
            }
        }
    }

    if let Ok(output) = std::process::Command::new("which").arg(CLI_NAME).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                tracing::debug!(path = %path, "Found appcenter-cli via which");
                return Ok(PathBuf::from(path));
            }
        }
    }

    Err(WatchcowError::Installer(
        "appcenter-cli not found in well-known locations or PATH".to_string(),
    ))
}
