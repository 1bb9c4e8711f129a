//! In-memory registry of installed apps
//!
//! The registry is read by HTTP handlers (redirect page, dashboard) and
//! written only by the controller's operation worker. Reads return clones
//! so callers never observe a partially-updated app.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::app::{App, Status};

/// Thread-safe registry of live apps, keyed by app name.
#[derive(Debug, Default)]
pub struct Registry {
    apps: RwLock<HashMap<String, App>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates an app.
    pub fn register(&self, app: App) {
        let mut apps = self.apps.write().unwrap();
        apps.insert(app.app_name.clone(), app);
    }

    /// Removes an app. Returns true if it was present.
    pub fn unregister(&self, app_name: &str) -> bool {
        let mut apps = self.apps.write().unwrap();
        apps.remove(app_name).is_some()
    }

    /// Retrieves an app by name.
    pub fn get(&self, app_name: &str) -> Option<App> {
        let apps = self.apps.read().unwrap();
        apps.get(app_name).cloned()
    }

    /// Retrieves an app by its 12-character container id prefix.
    pub fn get_by_container_id(&self, container_id: &str) -> Option<App> {
        let apps = self.apps.read().unwrap();
        apps.values()
            .find(|a| a.container_id == container_id)
            .cloned()
    }

    /// Returns all registered apps.
    pub fn list(&self) -> Vec<App> {
        let apps = self.apps.read().unwrap();
        apps.values().cloned().collect()
    }

    /// Updates the status of an app. Returns false if the app is unknown.
    pub fn update_status(&self, app_name: &str, status: Status) -> bool {
        let mut apps = self.apps.write().unwrap();
        match apps.get_mut(app_name) {
            Some(app) => {
                app.status = Some(status);
                true
            }
            None => false,
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.apps.read().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app(name: &str, container_id: &str) -> App {
        App {
            app_name: name.to_string(),
            display_name: "Test".to_string(),
            container_id: container_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));

        let app = registry.get("watchcow.nginx").unwrap();
        assert_eq!(app.container_id, "abc123def456");
        assert!(registry.get("watchcow.other").is_none());
    }

    #[test]
    fn test_register_is_upsert() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));
        registry.register(test_app("watchcow.nginx", "fedcba654321"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("watchcow.nginx").unwrap().container_id,
            "fedcba654321"
        );
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));

        assert!(registry.unregister("watchcow.nginx"));
        assert!(!registry.unregister("watchcow.nginx"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_by_container_id() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));
        registry.register(test_app("watchcow.memos", "111222333444"));

        let app = registry.get_by_container_id("111222333444").unwrap();
        assert_eq!(app.app_name, "watchcow.memos");
        assert!(registry.get_by_container_id("000000000000").is_none());
    }

    #[test]
    fn test_update_status() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));

        assert!(registry.update_status("watchcow.nginx", Status::Running));
        assert_eq!(
            registry.get("watchcow.nginx").unwrap().status,
            Some(Status::Running)
        );
        assert!(!registry.update_status("watchcow.ghost", Status::Running));
    }

    #[test]
    fn test_reads_return_copies() {
        let registry = Registry::new();
        registry.register(test_app("watchcow.nginx", "abc123def456"));

        let mut copy = registry.get("watchcow.nginx").unwrap();
        copy.container_id = "mutated00000".to_string();

        assert_eq!(
            registry.get("watchcow.nginx").unwrap().container_id,
            "abc123def456"
        );
    }
}
