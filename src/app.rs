//! Core app model
//!
//! An [`App`] is a watchcow-managed application: a Docker container adopted
//! as an fnOS appcenter app. Apps are parsed either from `watchcow.*`
//! container labels or from a dashboard-saved configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime status of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(dead_code)]
pub enum Status {
    /// Waiting to be installed
    Pending,
    /// Installed but not running
    Installed,
    /// Running
    Running,
    /// Stopped
    Stopped,
    /// Uninstalled
    Uninstalled,
}

/// Permission settings for an entry.
///
/// Each field is one of `editable`, `readonly`, or `hidden`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryControl {
    pub access_perm: String,
    pub port_perm: String,
    pub path_perm: String,
}

/// A UI entry point for an app.
///
/// The entry with the empty name is the default entry; an app has at most
/// one of those.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry identifier (empty for the default entry)
    pub name: String,
    /// Display title
    pub title: String,
    /// `http` or `https`
    pub protocol: String,
    /// Host-side service port
    pub port: String,
    /// URL path
    pub path: String,
    /// `url` (new tab) or `iframe` (desktop window)
    pub ui_type: String,
    /// true = all users can access, false = admin only
    pub all_users: bool,
    /// Icon source: URL (`file://` or `http(s)://`) from labels, or base64
    /// data from the dashboard
    pub icon: String,
    /// Supported file types for the right-click menu
    pub file_types: Vec<String>,
    /// Hide from desktop (only reachable from the right-click menu)
    pub no_display: bool,
    /// Permission control settings
    pub control: Option<EntryControl>,
    /// External redirect host for the redirect page
    pub redirect: String,
}

impl Entry {
    /// Full entry name: `<appname>` for the default entry, otherwise
    /// `<appname>.<name>`.
    pub fn full_name(&self, app_name: &str) -> String {
        if self.name.is_empty() {
            app_name.to_string()
        } else {
            format!("{}.{}", app_name, self.name)
        }
    }
}

/// A container volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub source: String,
    pub destination: String,
    pub read_only: bool,
    /// `bind` or `volume`
    pub kind: String,
}

/// A watchcow-managed application.
///
/// Parsed from container labels or a stored dashboard configuration; used
/// both for package generation and for runtime lookups (redirect page).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct App {
    // Identity (matches the fnOS manifest fields)
    pub app_name: String,
    pub version: String,
    pub display_name: String,
    pub description: String,
    pub maintainer: String,

    // Container
    /// 12-character container id prefix
    pub container_id: String,
    pub container_name: String,
    pub image: String,

    /// UI entries, default entry first when present
    pub entries: Vec<Entry>,

    pub volumes: Vec<VolumeMapping>,
    pub environment: Vec<String>,
    pub restart_policy: String,

    /// Original watchcow labels, kept for reference
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Runtime state, managed by the controller
    pub status: Option<Status>,
}

impl App {
    /// Returns the entry with the given name. Pass the empty string for the
    /// default entry.
    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Returns the default entry (empty name), or the first entry if no
    /// default exists.
    pub fn default_entry(&self) -> Option<&Entry> {
        self.entry("").or_else(|| self.entries.first())
    }

    /// Full name of the first displayable entry, used as the desktop launch
    /// target. Entries keep insertion order: default entry first.
    pub fn default_launch_entry(&self) -> Option<String> {
        self.entries
            .iter()
            .find(|e| !e.no_display)
            .map(|e| e.full_name(&self.app_name))
    }

    /// True if any entry has a redirect host configured.
    #[allow(dead_code)]
    pub fn has_redirect(&self) -> bool {
        self.entries.iter().any(|e| !e.redirect.is_empty())
    }
}

/// Sanitizes a container name into a valid app-name component: lowercase,
/// with runs of anything outside `[a-z0-9-]` collapsed to a single `-`.
pub fn sanitize_app_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            if pending_dash && !result.is_empty() {
                result.push('-');
            }
            pending_dash = false;
            result.push(c);
        } else {
            pending_dash = true;
        }
    }
    result
}

/// Default app name for a container: `watchcow.<sanitized-name>`.
pub fn default_app_name(container_name: &str) -> String {
    format!("watchcow.{}", sanitize_app_name(container_name))
}

/// Converts a container name to a presentable title: trims trailing
/// `-1`/`_1` compose suffixes, turns separators into spaces, capitalizes
/// each word.
pub fn prettify_name(name: &str) -> String {
    let name = name
        .strip_suffix("-1")
        .or_else(|| name.strip_suffix("_1"))
        .unwrap_or(name);
    let name = name.replace(['_', '-'], " ");

    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
