//! App package generation
//!
//! Turns a container (or a dashboard-stored configuration) into a complete
//! appcenter package directory: manifest, UI config, lifecycle scripts,
//! and icons. The returned [`tempfile::TempDir`] owns the directory; it is
//! removed when dropped, so every exit path releases the package.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

use crate::app::{default_app_name, prettify_name, App, Entry, EntryControl};
use crate::docker::{ContainerDetails, DockerClient};
use crate::error::{Result, WatchcowError};
use crate::icons::{image_basename, render_icon, save_png, IconResolver};
use crate::store::StoredConfig;
use crate::templates;

/// Label namespace consumed by watchcow.
pub const LABEL_PREFIX: &str = "watchcow.";

/// Compose label used to resolve relative `file://` icon paths.
pub const COMPOSE_WORKDIR_LABEL: &str = "com.docker.compose.project.working_dir";

/// Environment variables never copied into a package.
const ENV_BLACKLIST: &[&str] = &["PATH=", "HOME=", "USER=", "HOSTNAME=", "PWD=", "SHLVL="];

/// Entry-level label suffixes.
const ENTRY_FIELDS: &[&str] = &[
    "service_port",
    "protocol",
    "path",
    "ui_type",
    "all_users",
    "icon",
    "title",
    "file_types",
    "no_display",
    "redirect",
    "control.access_perm",
    "control.port_perm",
    "control.path_perm",
];

/// Generates appcenter packages from containers.
pub struct Generator {
    docker: DockerClient,
    resolver: IconResolver,
}

impl Generator {
    pub fn new(docker: DockerClient, resolver: IconResolver) -> Self {
        Self { docker, resolver }
    }

    /// Inspects a container and materializes its package. When `stored` is
    /// given the dashboard configuration wins over labels.
    pub async fn generate_from_container(
        &self,
        container_id: &str,
        stored: Option<&StoredConfig>,
    ) -> Result<(App, TempDir)> {
        let details = self.docker.inspect(container_id).await?;
        self.generate_from_details(&details, stored).await
    }

    /// Materializes a package for already-inspected container details.
    pub async fn generate_from_details(
        &self,
        details: &ContainerDetails,
        stored: Option<&StoredConfig>,
    ) -> Result<(App, TempDir)> {
        let app = match stored {
            Some(config) => app_from_stored(details, config),
            None => app_from_labels(details),
        };

        tracing::info!(app = app.app_name, container = app.container_name, "Generating app package");

        let dir = TempDir::with_prefix(format!("watchcow-{}-", app.app_name))
            .map_err(|e| WatchcowError::Generate(format!("failed to create temp dir: {}", e)))?;

        self.write_package(&app, stored, dir.path()).await?;

        tracing::info!(app = app.app_name, dir = %dir.path().display(), "App package generated");
        Ok((app, dir))
    }

    async fn write_package(
        &self,
        app: &App,
        stored: Option<&StoredConfig>,
        dir: &Path,
    ) -> Result<()> {
        let ui_dir = dir.join("app/ui");
        let images_dir = ui_dir.join("images");
        let cmd_dir = dir.join("cmd");
        fs::create_dir_all(&images_dir)?;
        fs::create_dir_all(&cmd_dir)?;

        write_data(&dir.join("manifest"), &templates::render_manifest(app))?;
        write_data(&dir.join("LICENSE"), templates::LICENSE)?;
        write_data(&ui_dir.join("config"), &templates::render_ui_config(app)?)?;

        write_script(&cmd_dir.join("main"), &templates::render_main_script(app))?;
        write_script(
            &cmd_dir.join("install_callback"),
            &templates::render_install_callback(app),
        )?;
        for script in templates::EMPTY_CMD_SCRIPTS {
            write_script(&cmd_dir.join(script), templates::EMPTY_SCRIPT)?;
        }

        self.write_icons(app, stored, dir, &images_dir).await
    }

    /// Renders 64 and 256 pixel icons for every entry, plus the root
    /// `ICON.PNG`/`ICON_256.PNG` pair from the default entry (or the first
    /// entry when no default exists).
    async fn write_icons(
        &self,
        app: &App,
        stored: Option<&StoredConfig>,
        dir: &Path,
        images_dir: &Path,
    ) -> Result<()> {
        let base_path = app
            .labels
            .get(COMPOSE_WORKDIR_LABEL)
            .map(Path::new);

        for (index, entry) in app.entries.iter().enumerate() {
            // Dashboard configs carry uploaded icons as base64; labels carry
            // URLs in the entry itself.
            let stored_icon = stored.map(|s| {
                s.entries
                    .iter()
                    .find(|e| e.name == entry.name)
                    .map(|e| e.icon_base64.as_str())
                    .filter(|icon| !icon.is_empty())
                    .unwrap_or(s.icon_base64.as_str())
            });
            let explicit = stored_icon.unwrap_or(&entry.icon);

            let fallback_name = if entry.name.is_empty() {
                image_basename(&app.image)
            } else {
                entry.name.clone()
            };

            let img = self.resolver.resolve(explicit, &fallback_name, base_path).await;
            let icon64 = render_icon(&img, 64);
            let icon256 = render_icon(&img, 256);

            let (name64, name256) = if entry.name.is_empty() {
                ("icon_64.png".to_string(), "icon_256.png".to_string())
            } else {
                (
                    format!("icon_{}_64.png", entry.name),
                    format!("icon_{}_256.png", entry.name),
                )
            };
            save_png(&icon64, &images_dir.join(name64))?;
            save_png(&icon256, &images_dir.join(name256))?;

            // Root icons follow the default entry, or the first entry when
            // the app has no default
            if entry.name.is_empty() || (index == 0 && app.entry("").is_none()) {
                save_png(&icon64, &dir.join("ICON.PNG"))?;
                save_png(&icon256, &dir.join("ICON_256.PNG"))?;
            }
        }

        Ok(())
    }
}

fn write_data(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

fn write_script(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Label lookup with fallback; empty values count as absent.
pub fn get_label<'a>(labels: &'a HashMap<String, String>, key: &str, fallback: &'a str) -> &'a str {
    match labels.get(key) {
        Some(value) if !value.is_empty() => value,
        _ => fallback,
    }
}

/// Filters out shell housekeeping variables.
pub fn filter_environment(env: &[String]) -> Vec<String> {
    env.iter()
        .filter(|e| !ENV_BLACKLIST.iter().any(|b| e.starts_with(b)))
        .cloned()
        .collect()
}

/// Builds an [`App`] from container labels.
pub fn app_from_labels(details: &ContainerDetails) -> App {
    let labels = &details.labels;
    let name = &details.name;

    let app_name = get_label(labels, "watchcow.appname", &default_app_name(name)).to_string();
    let display_name =
        get_label(labels, "watchcow.display_name", &prettify_name(name)).to_string();
    let default_desc = format!("Docker container: {}", details.image);
    let description = get_label(labels, "watchcow.desc", &default_desc).to_string();

    let default_port = details.first_host_port().unwrap_or("").to_string();
    let port = get_label(labels, "watchcow.service_port", &default_port).to_string();

    let mut entries = parse_entries(labels, &display_name, &port);
    if entries.is_empty() {
        entries.push(Entry {
            name: String::new(),
            title: display_name.clone(),
            protocol: get_label(labels, "watchcow.protocol", "http").to_string(),
            port: port.clone(),
            path: get_label(labels, "watchcow.path", "/").to_string(),
            ui_type: get_label(labels, "watchcow.ui_type", "url").to_string(),
            all_users: get_label(labels, "watchcow.all_users", "true") == "true",
            icon: get_label(labels, "watchcow.icon", "").to_string(),
            file_types: Vec::new(),
            no_display: get_label(labels, "watchcow.no_display", "false") == "true",
            control: None,
            redirect: get_label(labels, "watchcow.redirect", "").to_string(),
        });
    }

    App {
        app_name,
        version: get_label(labels, "watchcow.version", "1.0.0").to_string(),
        display_name,
        description,
        maintainer: get_label(labels, "watchcow.maintainer", "WatchCow").to_string(),
        container_id: details.id.clone(),
        container_name: name.clone(),
        image: details.image.clone(),
        entries,
        volumes: details.mounts.clone(),
        environment: filter_environment(&details.env),
        restart_policy: details.restart_policy.clone(),
        labels: labels.clone(),
        status: None,
    }
}

/// Builds an [`App`] from a dashboard-stored configuration, filling gaps
/// from the container.
pub fn app_from_stored(details: &ContainerDetails, stored: &StoredConfig) -> App {
    let name = &details.name;
    let default_port = details.first_host_port().unwrap_or("").to_string();

    let mut entries: Vec<Entry> = stored
        .entries
        .iter()
        .map(|e| Entry {
            name: e.name.clone(),
            title: if e.title.is_empty() {
                stored.display_name.clone()
            } else {
                e.title.clone()
            },
            protocol: or_else(&e.protocol, "http"),
            port: or_else(&e.port, &default_port),
            path: or_else(&e.path, "/"),
            ui_type: or_else(&e.ui_type, "url"),
            all_users: e.all_users,
            icon: e.icon_base64.clone(),
            file_types: e.file_types.clone(),
            no_display: e.no_display,
            control: None,
            redirect: e.redirect.clone(),
        })
        .collect();

    if entries.is_empty() {
        entries.push(Entry {
            name: String::new(),
            title: stored.display_name.clone(),
            protocol: "http".to_string(),
            port: default_port,
            path: "/".to_string(),
            ui_type: "url".to_string(),
            all_users: true,
            ..Default::default()
        });
    }

    App {
        app_name: or_else(&stored.app_name, &default_app_name(name)),
        version: or_else(&stored.version, "1.0.0"),
        display_name: or_else(&stored.display_name, name),
        description: or_else(&stored.description, &details.image),
        maintainer: or_else(&stored.maintainer, "WatchCow"),
        container_id: details.id.clone(),
        container_name: name.clone(),
        image: details.image.clone(),
        entries,
        volumes: details.mounts.clone(),
        environment: filter_environment(&details.env),
        restart_policy: details.restart_policy.clone(),
        labels: details.labels.clone(),
        status: None,
    }
}

fn or_else(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn is_entry_field(field: &str) -> bool {
    ENTRY_FIELDS.contains(&field) || field.starts_with("control.")
}

/// True when any default-entry field appears directly under `watchcow.`.
fn has_default_entry(labels: &HashMap<String, String>) -> bool {
    ["service_port", "protocol", "path", "title", "ui_type"]
        .iter()
        .any(|f| labels.contains_key(&format!("{}{}", LABEL_PREFIX, f)))
}

/// Parses one entry. `name` is empty for the default entry.
fn parse_entry(labels: &HashMap<String, String>, name: &str, display_name: &str) -> Entry {
    let prefix = if name.is_empty() {
        LABEL_PREFIX.to_string()
    } else {
        format!("{}{}.", LABEL_PREFIX, name)
    };
    let label = |field: &str, fallback: &str| -> String {
        get_label(labels, &format!("{}{}", prefix, field), fallback).to_string()
    };

    let title = {
        let explicit = label("title", "");
        if !explicit.is_empty() {
            explicit
        } else if name.is_empty() {
            display_name.to_string()
        } else {
            format!("{} - {}", display_name, name)
        }
    };

    let file_types: Vec<String> = label("file_types", "")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let access_perm = label("control.access_perm", "");
    let port_perm = label("control.port_perm", "");
    let path_perm = label("control.path_perm", "");
    let control = if access_perm.is_empty() && port_perm.is_empty() && path_perm.is_empty() {
        None
    } else {
        Some(EntryControl {
            access_perm,
            port_perm,
            path_perm,
        })
    };

    Entry {
        name: name.to_string(),
        title,
        protocol: label("protocol", "http"),
        port: label("service_port", ""),
        path: label("path", "/"),
        ui_type: label("ui_type", "url"),
        all_users: label("all_users", "true") == "true",
        icon: label("icon", ""),
        file_types,
        no_display: label("no_display", "false") == "true",
        control,
        redirect: label("redirect", ""),
    }
}

/// Extracts all entries configured in labels: the default entry when any of
/// its fields is present, then named entries in sorted order. Entries
/// without a port inherit `default_port`.
pub fn parse_entries(
    labels: &HashMap<String, String>,
    display_name: &str,
    default_port: &str,
) -> Vec<Entry> {
    let mut entry_names: Vec<&str> = labels
        .keys()
        .filter_map(|key| key.strip_prefix(LABEL_PREFIX))
        .filter_map(|suffix| {
            let (name, field) = suffix.split_once('.')?;
            (is_entry_field(field) && !name.is_empty() && name != "control").then_some(name)
        })
        .collect();
    entry_names.sort_unstable();
    entry_names.dedup();

    let mut entries = Vec::new();

    if has_default_entry(labels) {
        let mut entry = parse_entry(labels, "", display_name);
        if entry.port.is_empty() {
            entry.port = default_port.to_string();
        }
        entries.push(entry);
    }

    for name in entry_names {
        let mut entry = parse_entry(labels, name, display_name);
        if entry.port.is_empty() {
            entry.port = default_port.to_string();
        }
        entries.push(entry);
    }

    entries
}
