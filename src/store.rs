//! Dashboard configuration store
//!
//! Persistent map from [`ContainerKey`] to [`StoredConfig`], serialized as
//! pretty JSON in a single file. Saves are atomic (write `.tmp`, fsync,
//! rename) so a crash mid-write never loses the previous state; load
//! recovers from a leftover `.tmp` when the rename did not complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Result, WatchcowError};

/// Storage file name inside the store directory.
const STORE_FILE: &str = "dashboard.json";

/// Uniquely identifies a container by image and port mappings, stable
/// across container re-creation.
///
/// Format: `image|containerPort:hostPort,...` with the formatted pairs
/// sorted, e.g. `nginx:alpine|443:8443,80:8080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerKey(String);

impl ContainerKey {
    /// Builds a key from an image reference and a containerPort → hostPort
    /// map. Deterministic regardless of map iteration order.
    pub fn new(image: &str, ports: &HashMap<String, String>) -> Self {
        if ports.is_empty() {
            return Self(format!("{}|", image));
        }

        let mut pairs: Vec<String> = ports
            .iter()
            .map(|(cport, hport)| format!("{}:{}", cport, hport))
            .collect();
        pairs.sort();

        Self(format!("{}|{}", image, pairs.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The image part of the key.
    #[allow(dead_code)]
    pub fn image(&self) -> &str {
        self.0.split('|').next().unwrap_or("")
    }
}

impl std::fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ContainerKey {
    fn default() -> Self {
        Self(String::new())
    }
}

/// A saved entry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Entry identifier (empty for the default entry)
    #[serde(default)]
    pub name: String,
    pub title: String,
    pub protocol: String,
    pub port: String,
    pub path: String,
    pub ui_type: String,
    pub all_users: bool,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub no_display: bool,
    #[serde(default)]
    pub redirect: String,
    /// Base64-encoded PNG icon for this entry
    #[serde(default)]
    pub icon_base64: String,
}

/// A saved container configuration, created from the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    pub key: ContainerKey,
    pub app_name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub maintainer: String,
    #[serde(default)]
    pub entries: Vec<StoredEntry>,
    /// Base64-encoded PNG icon for the app
    #[serde(default)]
    pub icon_base64: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent store of dashboard-originated container configurations.
#[derive(Debug)]
pub struct ConfigStore {
    configs: RwLock<HashMap<ContainerKey, StoredConfig>>,
    file_path: PathBuf,
}

impl ConfigStore {
    /// Opens (or initializes) the store inside `store_dir`.
    pub fn open<P: AsRef<Path>>(store_dir: P) -> Result<Self> {
        let file_path = store_dir.as_ref().join(STORE_FILE);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let store = Self {
            configs: RwLock::new(HashMap::new()),
            file_path,
        };

        match store.load() {
            Ok(count) => {
                tracing::debug!(path = %store.file_path.display(), configs = count, "Loaded dashboard store")
            }
            Err(e) => {
                tracing::warn!(path = %store.file_path.display(), error = %e, "Failed to load dashboard store, starting fresh")
            }
        }

        Ok(store)
    }

    /// Reads configurations from disk, recovering from an interrupted
    /// atomic save when possible. Returns the number of configs loaded.
    fn load(&self) -> Result<usize> {
        let tmp_path = self.tmp_path();

        if tmp_path.exists() {
            match Self::read_file(&tmp_path) {
                Ok(configs) => {
                    tracing::info!(path = %tmp_path.display(), "Recovered store from incomplete save");
                    // Promote tmp to the main file
                    fs::rename(&tmp_path, &self.file_path)?;
                    let count = configs.len();
                    *self.configs.write().unwrap() = configs;
                    return Ok(count);
                }
                Err(_) => {
                    // Corrupt leftover, discard
                    let _ = fs::remove_file(&tmp_path);
                }
            }
        }

        let configs = Self::read_file(&self.file_path)?;
        let count = configs.len();
        *self.configs.write().unwrap() = configs;
        Ok(count)
    }

    fn read_file(path: &Path) -> Result<HashMap<ContainerKey, StoredConfig>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.file_path.as_os_str().to_owned();
        p.push(".tmp");
        PathBuf::from(p)
    }

    /// Writes the current map to disk: `.tmp` file, fsync, rename over the
    /// target. Must be called with the write lock held.
    fn save(&self, configs: &HashMap<ContainerKey, StoredConfig>) -> Result<()> {
        let tmp_path = self.tmp_path();
        let contents = serde_json::to_string_pretty(configs)?;

        let write = || -> std::io::Result<()> {
            let file = fs::File::create(&tmp_path)?;
            use std::io::Write;
            let mut file = std::io::BufWriter::new(file);
            file.write_all(contents.as_bytes())?;
            file.into_inner()?.sync_all()?;
            Ok(())
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(WatchcowError::Store(format!(
                "failed to write {}: {}",
                tmp_path.display(),
                e
            )));
        }

        fs::rename(&tmp_path, &self.file_path)?;
        Ok(())
    }

    /// Retrieves a configuration by key. Returns a defensive copy.
    pub fn get(&self, key: &ContainerKey) -> Option<StoredConfig> {
        self.configs.read().unwrap().get(key).cloned()
    }

    /// Lookup by key string, the capability the controller consumes.
    pub fn get_by_key(&self, key: &str) -> Option<StoredConfig> {
        self.get(&ContainerKey::from(key))
    }

    pub fn has(&self, key: &ContainerKey) -> bool {
        self.configs.read().unwrap().contains_key(key)
    }

    /// Stores a configuration and persists the map.
    pub fn set(&self, config: StoredConfig) -> Result<()> {
        let mut configs = self.configs.write().unwrap();
        configs.insert(config.key.clone(), config);
        self.save(&configs)
    }

    /// Removes a configuration and persists the map.
    pub fn delete(&self, key: &ContainerKey) -> Result<()> {
        let mut configs = self.configs.write().unwrap();
        configs.remove(key);
        self.save(&configs)
    }

    /// Returns all stored configurations (defensive copies).
    #[allow(dead_code)]
    pub fn list(&self) -> Vec<StoredConfig> {
        self.configs.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(key: &str) -> StoredConfig {
        StoredConfig {
            key: ContainerKey::from(key),
            app_name: "watchcow.nginx".to_string(),
            display_name: "Nginx".to_string(),
            description: "Web server".to_string(),
            version: "1.0.0".to_string(),
            maintainer: "Test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            entries: vec![StoredEntry {
                name: String::new(),
                title: "Nginx".to_string(),
                protocol: "http".to_string(),
                port: "80".to_string(),
                path: "/".to_string(),
                ui_type: "url".to_string(),
                all_users: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_container_key_format() {
        let mut ports = HashMap::new();
        assert_eq!(
            ContainerKey::new("nginx:alpine", &ports).as_str(),
            "nginx:alpine|"
        );

        ports.insert("80".to_string(), "8080".to_string());
        assert_eq!(
            ContainerKey::new("nginx:alpine", &ports).as_str(),
            "nginx:alpine|80:8080"
        );

        ports.insert("443".to_string(), "8443".to_string());
        assert_eq!(
            ContainerKey::new("nginx:alpine", &ports).as_str(),
            "nginx:alpine|443:8443,80:8080"
        );
    }

    #[test]
    fn test_container_key_deterministic() {
        // Insertion order must not matter
        let mut a = HashMap::new();
        a.insert("9000".to_string(), "19000".to_string());
        a.insert("3000".to_string(), "13000".to_string());
        a.insert("8080".to_string(), "18080".to_string());

        let mut b = HashMap::new();
        b.insert("8080".to_string(), "18080".to_string());
        b.insert("9000".to_string(), "19000".to_string());
        b.insert("3000".to_string(), "13000".to_string());

        let ka = ContainerKey::new("myapp:latest", &a);
        let kb = ContainerKey::new("myapp:latest", &b);
        assert_eq!(ka, kb);
        assert_eq!(ka.as_str(), "myapp:latest|3000:13000,8080:18080,9000:19000");
    }

    #[test]
    fn test_container_key_image() {
        assert_eq!(
            ContainerKey::from("nginx:alpine|80:8080").image(),
            "nginx:alpine"
        );
        assert_eq!(ContainerKey::from("nginx:alpine|").image(), "nginx:alpine");
        assert_eq!(ContainerKey::from("").image(), "");
    }

    #[test]
    fn test_set_and_get() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let config = test_config("nginx:alpine|80:8080");
        store.set(config.clone()).unwrap();

        let got = store.get(&config.key).unwrap();
        assert_eq!(got.app_name, "watchcow.nginx");
        assert_eq!(got.entries.len(), 1);
        assert!(dir.path().join(STORE_FILE).exists());
    }

    #[test]
    fn test_roundtrip_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config("nginx:alpine|80:8080");

        {
            let store = ConfigStore::open(dir.path()).unwrap();
            store.set(config.clone()).unwrap();
        }

        let store = ConfigStore::open(dir.path()).unwrap();
        let got = store.get(&config.key).unwrap();
        assert_eq!(got, config);
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let config = test_config("nginx:alpine|80:8080");
        store.set(config.clone()).unwrap();
        assert!(store.has(&config.key));

        store.delete(&config.key).unwrap();
        assert!(!store.has(&config.key));
        assert!(store.get(&config.key).is_none());
    }

    #[test]
    fn test_get_returns_defensive_copy() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let config = test_config("nginx:alpine|80:8080");
        store.set(config.clone()).unwrap();

        let mut copy = store.get(&config.key).unwrap();
        copy.app_name = "mutated".to_string();

        assert_eq!(store.get(&config.key).unwrap().app_name, "watchcow.nginx");
    }

    #[test]
    fn test_recover_from_tmp_file() {
        let dir = TempDir::new().unwrap();

        // Simulate a crash after the .tmp write but before the rename
        let config = test_config("nginx:alpine|80:8080");
        let mut map = HashMap::new();
        map.insert(config.key.clone(), config.clone());
        let contents = serde_json::to_string_pretty(&map).unwrap();
        fs::write(dir.path().join(format!("{}.tmp", STORE_FILE)), contents).unwrap();

        let store = ConfigStore::open(dir.path()).unwrap();
        assert!(store.has(&config.key));
        // The tmp file was promoted into place
        assert!(dir.path().join(STORE_FILE).exists());
        assert!(!dir.path().join(format!("{}.tmp", STORE_FILE)).exists());
    }

    #[test]
    fn test_corrupt_tmp_file_discarded() {
        let dir = TempDir::new().unwrap();

        let config = test_config("nginx:alpine|80:8080");
        {
            let store = ConfigStore::open(dir.path()).unwrap();
            store.set(config.clone()).unwrap();
        }
        fs::write(
            dir.path().join(format!("{}.tmp", STORE_FILE)),
            b"not valid json",
        )
        .unwrap();

        let store = ConfigStore::open(dir.path()).unwrap();
        // Main file still loads, corrupt tmp is gone
        assert!(store.has(&config.key));
        assert!(!dir.path().join(format!("{}.tmp", STORE_FILE)).exists());
    }

    #[test]
    fn test_get_by_key_string() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let config = test_config("nginx:alpine|80:8080");
        store.set(config).unwrap();

        assert!(store.get_by_key("nginx:alpine|80:8080").is_some());
        assert!(store.get_by_key("other|").is_none());
    }
}
