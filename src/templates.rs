//! Package file rendering
//!
//! Renders the text files of an app package: the manifest, the UI config
//! JSON consumed by the desktop, and the `cmd/` lifecycle scripts. The
//! appcenter fills the `{0}` placeholder in icon paths with the icon size.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::app::App;
use crate::error::Result;

/// Control settings in the UI config document.
#[derive(Debug, Serialize)]
pub struct UiConfigControl {
    #[serde(rename = "accessPerm", skip_serializing_if = "String::is_empty")]
    pub access_perm: String,
    #[serde(rename = "portPerm", skip_serializing_if = "String::is_empty")]
    pub port_perm: String,
    #[serde(rename = "pathPerm", skip_serializing_if = "String::is_empty")]
    pub path_perm: String,
}

/// One entry in the UI config document.
#[derive(Debug, Serialize)]
pub struct UiConfigEntry {
    pub title: String,
    pub icon: String,
    #[serde(rename = "type")]
    pub ui_type: String,
    pub protocol: String,
    pub port: String,
    pub url: String,
    #[serde(rename = "allUsers")]
    pub all_users: bool,
    #[serde(rename = "fileTypes", skip_serializing_if = "Vec::is_empty")]
    pub file_types: Vec<String>,
    #[serde(rename = "noDisplay", skip_serializing_if = "is_false")]
    pub no_display: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<UiConfigControl>,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// The complete `app/ui/config` document: one `.url` mapping keyed by full
/// entry name.
#[derive(Debug, Serialize)]
pub struct UiConfig {
    #[serde(rename = ".url")]
    pub url: BTreeMap<String, UiConfigEntry>,
}

/// Icon path for an entry, relative to `app/ui`.
pub fn entry_icon_path(entry_name: &str) -> String {
    if entry_name.is_empty() {
        "images/icon_{0}.png".to_string()
    } else {
        format!("images/icon_{}_{{0}}.png", entry_name)
    }
}

/// Renders the UI config JSON for all entries of an app.
pub fn render_ui_config(app: &App) -> Result<String> {
    let mut url = BTreeMap::new();

    for entry in &app.entries {
        let control = entry.control.as_ref().map(|c| UiConfigControl {
            access_perm: c.access_perm.clone(),
            port_perm: c.port_perm.clone(),
            path_perm: c.path_perm.clone(),
        });

        url.insert(
            entry.full_name(&app.app_name),
            UiConfigEntry {
                title: entry.title.clone(),
                icon: entry_icon_path(&entry.name),
                ui_type: or_default(&entry.ui_type, "url"),
                protocol: or_default(&entry.protocol, "http"),
                port: entry.port.clone(),
                url: or_default(&entry.path, "/"),
                all_users: entry.all_users,
                file_types: entry.file_types.clone(),
                no_display: entry.no_display,
                control,
            },
        );
    }

    Ok(serde_json::to_string_pretty(&UiConfig { url })?)
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Renders the package manifest.
pub fn render_manifest(app: &App) -> String {
    let port = app.default_entry().map(|e| e.port.as_str()).unwrap_or("");
    let launch = app.default_launch_entry().unwrap_or_default();
    let description = app.description.replace('\n', " ");

    format!(
        r#"appname = "{appname}"
version = "{version}"
display_name = "{display_name}"
desc = "{desc}"
maintainer = "{maintainer}"
arch = "all"
service_port = "{port}"
desktop_applaunchname = "{launch}"
"#,
        appname = app.app_name,
        version = app.version,
        display_name = app.display_name,
        desc = description,
        maintainer = app.maintainer,
        port = port,
        launch = launch,
    )
}

/// Renders `cmd/main`: the appcenter drives the backing container through
/// it on app start/stop. When the container is gone, start recreates it
/// from the recorded run configuration.
pub fn render_main_script(app: &App) -> String {
    let restart_policy = if app.restart_policy.is_empty() {
        "unless-stopped"
    } else {
        app.restart_policy.as_str()
    };
    let mut run_args = vec![
        "-d".to_string(),
        format!("--name \"{}\"", app.container_name),
        format!("--restart {}", restart_policy),
    ];
    if let Some(entry) = app.default_entry() {
        if !entry.port.is_empty() {
            run_args.push(format!("-p {}:{}", entry.port, entry.port));
        }
    }
    for volume in &app.volumes {
        let ro = if volume.read_only { ":ro" } else { "" };
        run_args.push(format!(
            "-v \"{}:{}{}\"",
            volume.source, volume.destination, ro
        ));
    }
    for env in &app.environment {
        run_args.push(format!("-e \"{}\"", env));
    }
    run_args.push(format!("\"{}\"", app.image));
    let run_command = run_args.join(" \\\n            ");

    format!(
        r#"#!/bin/sh
# Lifecycle entry for {appname}; the appcenter invokes this with
# start|stop|status. The app is backed by the Docker container
# "{container}".

CONTAINER="{container}"

case "$1" in
    start)
        docker start "$CONTAINER" >/dev/null 2>&1 && exit 0
        # Container is gone, recreate it from the recorded configuration
        docker run {run_command} >/dev/null 2>&1 || exit 1
        ;;
    stop)
        docker stop "$CONTAINER" >/dev/null 2>&1 || exit 1
        ;;
    status)
        state=$(docker inspect -f '{{{{.State.Running}}}}' "$CONTAINER" 2>/dev/null)
        [ "$state" = "true" ] && exit 0 || exit 3
        ;;
    *)
        echo "usage: $0 {{start|stop|status}}" >&2
        exit 2
        ;;
esac

exit 0
"#,
        appname = app.app_name,
        container = app.container_name,
        run_command = run_command,
    )
}

/// Renders `cmd/install_callback`: links the watchcow binary as the app's
/// CGI entry so the redirect page is reachable through the web station.
pub fn render_install_callback(app: &App) -> String {
    format!(
        r#"#!/bin/sh
# Post-install hook for {appname}.

APP_UI_DIR="/var/apps/{appname}/target/app/ui"
WATCHCOW_BIN="/var/apps/watchcow/target/bin/watchcow"

if [ -x "$WATCHCOW_BIN" ] && [ -d "$APP_UI_DIR" ]; then
    ln -sf "$WATCHCOW_BIN" "$APP_UI_DIR/index.cgi"
fi

exit 0
"#,
        appname = app.app_name,
    )
}

/// Body of the lifecycle scripts that have nothing to do.
pub const EMPTY_SCRIPT: &str = "#!/bin/sh\nexit 0\n";

/// License file placed at the package root.
pub const LICENSE: &str = "\
This application package was generated by WatchCow from a Docker container.
The packaged software retains its own license; consult the upstream image
for terms.
";

/// Names of the `cmd/` scripts with empty bodies.
pub const EMPTY_CMD_SCRIPTS: &[&str] = &[
    "install_init",
    "uninstall_init",
    "uninstall_callback",
    "upgrade_init",
    "upgrade_callback",
    "config_init",
    "config_callback",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Entry, EntryControl};

    fn test_app() -> App {
        App {
            app_name: "watchcow.memos".to_string(),
            version: "1.0.0".to_string(),
            display_name: "Memos".to_string(),
            description: "Note taking\napp".to_string(),
            maintainer: "WatchCow".to_string(),
            container_id: "abc123def456".to_string(),
            container_name: "memos".to_string(),
            image: "neosmemo/memos:stable".to_string(),
            entries: vec![
                Entry {
                    name: String::new(),
                    title: "Memos".to_string(),
                    protocol: "http".to_string(),
                    port: "5230".to_string(),
                    path: "/".to_string(),
                    ui_type: "url".to_string(),
                    all_users: true,
                    ..Default::default()
                },
                Entry {
                    name: "admin".to_string(),
                    title: "Memos - admin".to_string(),
                    protocol: "http".to_string(),
                    port: "5231".to_string(),
                    path: "/admin".to_string(),
                    ui_type: "iframe".to_string(),
                    all_users: false,
                    control: Some(EntryControl {
                        access_perm: "readonly".to_string(),
                        port_perm: String::new(),
                        path_perm: String::new(),
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_ui_config_keys_and_shape() {
        let json = render_ui_config(&test_app()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let url = &value[".url"];
        assert!(url.get("watchcow.memos").is_some());
        assert!(url.get("watchcow.memos.admin").is_some());

        let default = &url["watchcow.memos"];
        assert_eq!(default["title"], "Memos");
        assert_eq!(default["type"], "url");
        assert_eq!(default["port"], "5230");
        assert_eq!(default["url"], "/");
        assert_eq!(default["allUsers"], true);
        assert_eq!(default["icon"], "images/icon_{0}.png");
        assert!(default.get("noDisplay").is_none());
        assert!(default.get("control").is_none());

        let admin = &url["watchcow.memos.admin"];
        assert_eq!(admin["icon"], "images/icon_admin_{0}.png");
        assert_eq!(admin["control"]["accessPerm"], "readonly");
        assert!(admin["control"].get("portPerm").is_none());
    }

    #[test]
    fn test_manifest_fields() {
        let manifest = render_manifest(&test_app());
        assert!(manifest.contains(r#"appname = "watchcow.memos""#));
        assert!(manifest.contains(r#"service_port = "5230""#));
        assert!(manifest.contains(r#"desktop_applaunchname = "watchcow.memos""#));
        // Newlines in the description are flattened
        assert!(manifest.contains(r#"desc = "Note taking app""#));
    }

    #[test]
    fn test_launch_entry_skips_hidden_default() {
        let mut app = test_app();
        app.entries[0].no_display = true;
        let manifest = render_manifest(&app);
        assert!(manifest.contains(r#"desktop_applaunchname = "watchcow.memos.admin""#));
    }

    #[test]
    fn test_main_script_targets_container() {
        let script = render_main_script(&test_app());
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains(r#"CONTAINER="memos""#));
        assert!(script.contains("docker start"));
        assert!(script.contains("docker stop"));
    }

    #[test]
    fn test_main_script_recreate_uses_run_config() {
        let mut app = test_app();
        app.restart_policy = "unless-stopped".to_string();
        app.volumes = vec![crate::app::VolumeMapping {
            source: "/srv/memos".to_string(),
            destination: "/var/opt/memos".to_string(),
            read_only: true,
            kind: "bind".to_string(),
        }];
        app.environment = vec!["MEMOS_MODE=prod".to_string()];

        let script = render_main_script(&app);
        assert!(script.contains("docker run"));
        assert!(script.contains("--restart unless-stopped"));
        assert!(script.contains("-p 5230:5230"));
        assert!(script.contains(r#"-v "/srv/memos:/var/opt/memos:ro""#));
        assert!(script.contains(r#"-e "MEMOS_MODE=prod""#));
        assert!(script.contains(r#""neosmemo/memos:stable""#));
    }

    #[test]
    fn test_install_callback_links_cgi() {
        let script = render_install_callback(&test_app());
        assert!(script.contains("/var/apps/watchcow.memos/target/app/ui"));
        assert!(script.contains("index.cgi"));
    }
}
