//! Daemon configuration
//!
//! Values resolve in three layers: compiled defaults, an optional TOML
//! config file, then environment variables (`TRIM_PKGVAR`, `TRIM_PKGETC`,
//! `TRIM_DATA_SHARE_PATHS`, `WATCHCOW_ICON_CDN_TEMPLATE`). The resolved
//! struct is handed to component constructors; nothing reads the
//! environment after startup.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WatchcowError};

/// Socket path used when neither TRIM_PKGVAR nor the config file set one.
pub const FALLBACK_SOCKET_PATH: &str = "/tmp/watchcow/watchcow.sock";

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Unix socket path for the HTTP server
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Directory holding the dashboard configuration store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Docker daemon socket path
    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    /// Local icon library root (icons looked up as `<dir>/<name>.<ext>`)
    #[serde(default)]
    pub data_share_path: Option<PathBuf>,

    /// Icon CDN URL template with a single `%s` placeholder
    #[serde(default = "default_icon_cdn_template")]
    pub icon_cdn_template: String,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(FALLBACK_SOCKET_PATH)
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("/tmp/watchcow")
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_icon_cdn_template() -> String {
    "https://cdn.jsdelivr.net/gh/homarr-labs/dashboard-icons/png/%s.png".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            store_dir: default_store_dir(),
            docker_socket: default_docker_socket(),
            data_share_path: None,
            icon_cdn_template: default_icon_cdn_template(),
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.as_ref().exists() => {
                let contents = fs::read_to_string(p.as_ref())?;
                toml::from_str(&contents).map_err(|e| {
                    WatchcowError::Config(format!(
                        "failed to parse {}: {}",
                        p.as_ref().display(),
                        e
                    ))
                })?
            }
            Some(p) => {
                tracing::warn!("Config file not found at {:?}, using defaults", p.as_ref());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply TRIM_* / WATCHCOW_* environment overrides.
    fn apply_env(&mut self) {
        if let Ok(pkg_var) = std::env::var("TRIM_PKGVAR") {
            if !pkg_var.is_empty() {
                self.socket_path = PathBuf::from(pkg_var).join("watchcow.sock");
            }
        }
        if let Ok(pkg_etc) = std::env::var("TRIM_PKGETC") {
            if !pkg_etc.is_empty() {
                self.store_dir = PathBuf::from(pkg_etc);
            }
        }
        if let Ok(share) = std::env::var("TRIM_DATA_SHARE_PATHS") {
            if !share.is_empty() {
                self.data_share_path = Some(PathBuf::from(share));
            }
        }
        if let Ok(tmpl) = std::env::var("WATCHCOW_ICON_CDN_TEMPLATE") {
            if !tmpl.is_empty() {
                self.icon_cdn_template = tmpl;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.socket_path, PathBuf::from(FALLBACK_SOCKET_PATH));
        assert_eq!(config.docker_socket, "/var/run/docker.sock");
        assert!(config.icon_cdn_template.contains("%s"));
        assert!(config.data_share_path.is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Some("/nonexistent/watchcow.toml")).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/tmp/watchcow"));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watchcow.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, r#"docker_socket = "/run/docker.sock""#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.docker_socket, "/run/docker.sock");
        // Unspecified fields keep their defaults
        assert_eq!(config.socket_path, PathBuf::from(FALLBACK_SOCKET_PATH));
    }
}
