//! Dashboard HTTP handlers
//!
//! Lets a user configure non-labeled containers as apps: list containers,
//! edit a per-container configuration, save it (which triggers an install),
//! and delete it (which triggers an uninstall). Label-configured containers
//! are read-only here; their labels are the source of truth.
//!
//! The full dashboard UI ships separately; these handlers render minimal
//! HTML fragments around the configuration plumbing.

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::{Form, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;

use crate::app::default_app_name;
use crate::controller::ControllerHandle;
use crate::docker::ContainerSummaryInfo;
use crate::error::Result;
use crate::icons::{decode_image_data, render_icon};
use crate::store::{ConfigStore, ContainerKey, StoredConfig, StoredEntry};

/// Icon uploads are capped at 10 MiB.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Container listing capability, consumed by the dashboard.
pub trait ContainerLister: Send + Sync {
    fn list_all<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerSummaryInfo>>> + Send + 'a>>;
}

/// Install/uninstall trigger capability, consumed by the dashboard.
pub trait InstallTrigger: Send + Sync {
    fn trigger_install(&self, container_id: &str, container_name: &str, config: StoredConfig);
    fn trigger_uninstall(&self, container_id: &str, config: StoredConfig);
}

impl ContainerLister for ControllerHandle {
    fn list_all<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerSummaryInfo>>> + Send + 'a>> {
        Box::pin(self.list_all_containers())
    }
}

impl InstallTrigger for ControllerHandle {
    fn trigger_install(&self, container_id: &str, container_name: &str, config: StoredConfig) {
        ControllerHandle::trigger_install(self, container_id, container_name, config);
    }

    fn trigger_uninstall(&self, container_id: &str, config: StoredConfig) {
        ControllerHandle::trigger_uninstall(self, container_id, config);
    }
}

/// Shared state of the dashboard handlers.
#[derive(Clone)]
pub struct DashboardState {
    pub store: Arc<ConfigStore>,
    pub lister: Arc<dyn ContainerLister>,
    pub trigger: Arc<dyn InstallTrigger>,
}

/// Routes served by the dashboard.
pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/containers", get(handle_container_list))
        .route(
            "/containers/{id}",
            get(handle_container_form)
                .post(handle_container_save)
                .delete(handle_container_delete),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// A container enriched with its configuration status.
#[derive(Debug, Clone)]
struct ContainerView {
    id: String,
    name: String,
    image: String,
    state: String,
    key: ContainerKey,
    has_label_config: bool,
    has_stored_config: bool,
    config: Option<StoredConfig>,
}

async fn list_containers(state: &DashboardState) -> Result<Vec<ContainerView>> {
    let raw = state.lister.list_all().await?;

    let mut result: Vec<ContainerView> = raw
        .into_iter()
        .map(|c| {
            let key = ContainerKey::new(&c.image, &c.ports);
            let has_label_config =
                c.labels.get("watchcow.enable").map(String::as_str) == Some("true");
            let config = state.store.get(&key);
            ContainerView {
                id: c.id,
                name: c.name,
                image: c.image,
                state: c.state,
                has_label_config,
                has_stored_config: config.is_some(),
                config,
                key,
            }
        })
        .collect();

    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

async fn find_container(state: &DashboardState, id: &str) -> Result<Option<ContainerView>> {
    Ok(list_containers(state).await?.into_iter().find(|c| c.id == id))
}

async fn handle_index() -> Html<String> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>WatchCow</title></head>
<body>
<h1>WatchCow</h1>
<p>Configure Docker containers as apps.</p>
<div id="containers" data-src="/containers"></div>
</body>
</html>
"#
        .to_string(),
    )
}

async fn handle_container_list(
    State(state): State<DashboardState>,
) -> (StatusCode, Html<String>) {
    let containers = match list_containers(&state).await {
        Ok(containers) => containers,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list containers");
            return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list containers");
        }
    };

    let mut body = String::from("<ul class=\"containers\">\n");
    for c in &containers {
        let badge = if c.has_label_config {
            "labels"
        } else if c.has_stored_config {
            "configured"
        } else {
            "unconfigured"
        };
        body.push_str(&format!(
            "<li data-id=\"{id}\"><a href=\"/containers/{id}\">{name}</a> <span>{image}</span> <span>{state}</span> <em>{badge}</em></li>\n",
            id = html_escape(&c.id),
            name = html_escape(&c.name),
            image = html_escape(&c.image),
            state = html_escape(&c.state),
            badge = badge,
        ));
    }
    body.push_str("</ul>\n");

    (StatusCode::OK, Html(body))
}

async fn handle_container_form(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> (StatusCode, Html<String>) {
    let container = match find_container(&state, &id).await {
        Ok(Some(container)) => container,
        Ok(None) => return notification(StatusCode::NOT_FOUND, "Container not found"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up container");
            return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to look up container");
        }
    };

    let config = container
        .config
        .clone()
        .unwrap_or_else(|| default_config(&container));

    let entry = config.entries.first().cloned().unwrap_or_default();
    let body = format!(
        r#"<form method="post" action="/containers/{id}" enctype="multipart/form-data">
<fieldset {disabled}>
<input name="appname" value="{appname}">
<input name="display_name" value="{display_name}">
<input name="description" value="{description}">
<input name="version" value="{version}">
<input name="maintainer" value="{maintainer}">
<input name="entry_title" value="{entry_title}">
<input name="entry_protocol" value="{entry_protocol}">
<input name="entry_port" value="{entry_port}">
<input name="entry_path" value="{entry_path}">
<input name="entry_ui_type" value="{entry_ui_type}">
<input name="entry_all_users" value="{entry_all_users}">
<input name="entry_redirect" value="{entry_redirect}">
<input name="icon" type="file">
<button type="submit">Save</button>
</fieldset>
</form>
"#,
        id = html_escape(&container.id),
        disabled = if container.has_label_config { "disabled" } else { "" },
        appname = html_escape(&config.app_name),
        display_name = html_escape(&config.display_name),
        description = html_escape(&config.description),
        version = html_escape(&config.version),
        maintainer = html_escape(&config.maintainer),
        entry_title = html_escape(&entry.title),
        entry_protocol = html_escape(&entry.protocol),
        entry_port = html_escape(&entry.port),
        entry_path = html_escape(&entry.path),
        entry_ui_type = html_escape(&entry.ui_type),
        entry_all_users = entry.all_users,
        entry_redirect = html_escape(&entry.redirect),
    );

    (StatusCode::OK, Html(body))
}

async fn handle_container_save(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
    request: Request,
) -> (StatusCode, Html<String>) {
    let container = match find_container(&state, &id).await {
        Ok(Some(container)) => container,
        Ok(None) => return notification(StatusCode::NOT_FOUND, "Container not found"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up container");
            return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to look up container");
        }
    };

    if container.has_label_config {
        return notification(
            StatusCode::FORBIDDEN,
            "Label-configured containers cannot be modified",
        );
    }

    let (fields, icon) = match parse_save_request(request).await {
        Ok(parsed) => parsed,
        Err(msg) => return notification(StatusCode::BAD_REQUEST, msg),
    };

    let mut config = container.config.clone().unwrap_or_else(|| StoredConfig {
        key: container.key.clone(),
        created_at: Utc::now(),
        ..Default::default()
    });

    let field = |name: &str| fields.get(name).cloned().unwrap_or_default();
    config.app_name = field("appname");
    config.display_name = field("display_name");
    config.description = field("description");
    config.version = field("version");
    config.maintainer = field("maintainer");
    config.updated_at = Utc::now();
    config.entries = vec![entry_from_fields(&fields)];

    // Backfill identity defaults
    if config.app_name.is_empty() {
        config.app_name = default_app_name(&container.name);
    }
    if config.display_name.is_empty() {
        config.display_name = container.name.clone();
    }
    if config.version.is_empty() {
        config.version = "1.0.0".to_string();
    }
    if config.maintainer.is_empty() {
        config.maintainer = "WatchCow".to_string();
    }

    if let Some(icon_bytes) = icon {
        match process_icon_upload(&icon_bytes) {
            Ok(encoded) => config.icon_base64 = encoded,
            Err(msg) => return notification(StatusCode::BAD_REQUEST, msg),
        }
    }

    if let Err(e) = state.store.set(config.clone()) {
        tracing::error!(key = %config.key, error = %e, "Failed to save config");
        return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save configuration");
    }

    tracing::info!(key = %config.key, app = %config.app_name, "Saved container config");

    state
        .trigger
        .trigger_install(&container.id, &container.name, config);

    notification(StatusCode::OK, "Configuration saved successfully!")
}

async fn handle_container_delete(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> (StatusCode, Html<String>) {
    let container = match find_container(&state, &id).await {
        Ok(Some(container)) => container,
        Ok(None) => return notification(StatusCode::NOT_FOUND, "Container not found"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up container");
            return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to look up container");
        }
    };

    // Resolve the app before the config disappears
    let config = container
        .config
        .clone()
        .unwrap_or_else(|| default_config(&container));

    if let Err(e) = state.store.delete(&container.key) {
        tracing::error!(key = %container.key, error = %e, "Failed to delete config");
        return notification(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete configuration");
    }

    tracing::info!(key = %container.key, "Deleted container config");

    state.trigger.trigger_uninstall(&container.id, config);

    notification(
        StatusCode::OK,
        "Configuration deleted. Select a container from the list.",
    )
}

/// Parses the save request body: urlencoded form fields, or multipart with
/// an optional `icon` file part.
async fn parse_save_request(
    request: Request,
) -> std::result::Result<(HashMap<String, String>, Option<Vec<u8>>), &'static str> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|_| "Failed to parse upload")?;

        let mut fields = HashMap::new();
        let mut icon = None;
        while let Ok(Some(field)) = multipart.next_field().await {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "icon" {
                let bytes = field.bytes().await.map_err(|_| "Failed to read icon upload")?;
                if !bytes.is_empty() {
                    icon = Some(bytes.to_vec());
                }
            } else if let Ok(text) = field.text().await {
                fields.insert(name, text);
            }
        }
        Ok((fields, icon))
    } else {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|_| "Failed to parse form")?;
        Ok((fields, None))
    }
}

/// Builds the single default entry from form fields.
fn entry_from_fields(fields: &HashMap<String, String>) -> StoredEntry {
    let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

    let file_types: Vec<String> = field("entry_file_types")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    StoredEntry {
        name: String::new(),
        title: field("entry_title"),
        protocol: non_empty_or(field("entry_protocol"), "http"),
        port: field("entry_port"),
        path: non_empty_or(field("entry_path"), "/"),
        ui_type: non_empty_or(field("entry_ui_type"), "url"),
        all_users: field("entry_all_users") == "true",
        file_types,
        no_display: field("entry_no_display") == "true",
        redirect: field("entry_redirect"),
        icon_base64: String::new(),
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Decodes an uploaded icon, normalizes it to a 256 pixel PNG, and encodes
/// it for storage.
fn process_icon_upload(bytes: &[u8]) -> std::result::Result<String, &'static str> {
    let img = decode_image_data(bytes).map_err(|_| "Invalid image format")?;
    let resized = render_icon(&img, 256);

    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(resized)
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|_| "Failed to encode image")?;

    Ok(BASE64.encode(buf.into_inner()))
}

/// Default configuration synthesized for a container that has none yet.
fn default_config(container: &ContainerView) -> StoredConfig {
    StoredConfig {
        key: container.key.clone(),
        app_name: default_app_name(&container.name),
        display_name: container.name.clone(),
        description: container.image.clone(),
        version: "1.0.0".to_string(),
        maintainer: "WatchCow".to_string(),
        entries: vec![StoredEntry {
            name: String::new(),
            title: container.name.clone(),
            protocol: "http".to_string(),
            port: String::new(),
            path: "/".to_string(),
            ui_type: "url".to_string(),
            all_users: true,
            ..Default::default()
        }],
        created_at: Utc::now(),
        updated_at: Utc::now(),
        ..Default::default()
    }
}

fn notification(status: StatusCode, message: &str) -> (StatusCode, Html<String>) {
    let class = if status.is_success() { "is-success" } else { "is-danger" };
    (
        status,
        Html(format!(
            r#"<article class="notification {}">{}</article>"#,
            class,
            html_escape(message)
        )),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct FixedLister {
        containers: Vec<ContainerSummaryInfo>,
    }

    impl ContainerLister for FixedLister {
        fn list_all<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ContainerSummaryInfo>>> + Send + 'a>> {
            let containers = self.containers.clone();
            Box::pin(async move { Ok(containers) })
        }
    }

    #[derive(Default)]
    struct RecordingTrigger {
        installs: Mutex<Vec<(String, String)>>,
        uninstalls: Mutex<Vec<(String, String)>>,
    }

    impl InstallTrigger for RecordingTrigger {
        fn trigger_install(&self, container_id: &str, _name: &str, config: StoredConfig) {
            self.installs
                .lock()
                .unwrap()
                .push((container_id.to_string(), config.app_name));
        }

        fn trigger_uninstall(&self, container_id: &str, config: StoredConfig) {
            self.uninstalls
                .lock()
                .unwrap()
                .push((container_id.to_string(), config.app_name));
        }
    }

    fn container(id: &str, name: &str, labeled: bool) -> ContainerSummaryInfo {
        let mut labels = HashMap::new();
        if labeled {
            labels.insert("watchcow.enable".to_string(), "true".to_string());
        }
        ContainerSummaryInfo {
            id: id.to_string(),
            name: name.to_string(),
            image: "nginx:alpine".to_string(),
            state: "running".to_string(),
            ports: HashMap::from([("80".to_string(), "8080".to_string())]),
            labels,
            network_mode: "bridge".to_string(),
        }
    }

    fn test_state(
        dir: &TempDir,
        containers: Vec<ContainerSummaryInfo>,
    ) -> (DashboardState, Arc<RecordingTrigger>) {
        let trigger = Arc::new(RecordingTrigger::default());
        let state = DashboardState {
            store: Arc::new(ConfigStore::open(dir.path()).unwrap()),
            lister: Arc::new(FixedLister { containers }),
            trigger: trigger.clone(),
        };
        (state, trigger)
    }

    async fn send(
        state: DashboardState,
        request: HttpRequest<Body>,
    ) -> (StatusCode, String) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn test_list_shows_containers() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(
            &dir,
            vec![
                container("aaa111222333", "web", false),
                container("bbb444555666", "db", true),
            ],
        );

        let (status, body) = send(
            state,
            HttpRequest::builder()
                .uri("/containers")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("web"));
        assert!(body.contains("db"));
        assert!(body.contains("labels"));
    }

    #[tokio::test]
    async fn test_form_for_unknown_container() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir, vec![]);

        let (status, _) = send(
            state,
            HttpRequest::builder()
                .uri("/containers/nope00000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_save_forbidden_for_labeled_container() {
        let dir = TempDir::new().unwrap();
        let (state, trigger) = test_state(&dir, vec![container("aaa111222333", "web", true)]);

        let (status, body) = send(
            state,
            HttpRequest::builder()
                .method("POST")
                .uri("/containers/aaa111222333")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("appname=watchcow.web"))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("cannot be modified"));
        assert!(trigger.installs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_persists_and_triggers_install() {
        let dir = TempDir::new().unwrap();
        let (state, trigger) = test_state(&dir, vec![container("aaa111222333", "web", false)]);
        let store = state.store.clone();

        let form = "appname=watchcow.myweb&display_name=My+Web&entry_port=8080&entry_all_users=true";
        let (status, body) = send(
            state,
            HttpRequest::builder()
                .method("POST")
                .uri("/containers/aaa111222333")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "body: {}", body);

        let config = store.get_by_key("nginx:alpine|80:8080").unwrap();
        assert_eq!(config.app_name, "watchcow.myweb");
        assert_eq!(config.display_name, "My Web");
        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.entries[0].port, "8080");
        // Unset fields fall back to defaults
        assert_eq!(config.entries[0].protocol, "http");
        assert_eq!(config.entries[0].path, "/");
        assert_eq!(config.version, "1.0.0");

        let installs = trigger.installs.lock().unwrap();
        assert_eq!(
            installs.as_slice(),
            &[("aaa111222333".to_string(), "watchcow.myweb".to_string())]
        );
    }

    #[tokio::test]
    async fn test_save_defaults_empty_appname() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir, vec![container("aaa111222333", "My_Web", false)]);
        let store = state.store.clone();

        let (status, _) = send(
            state,
            HttpRequest::builder()
                .method("POST")
                .uri("/containers/aaa111222333")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("entry_port=8080"))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let config = store.get_by_key("nginx:alpine|80:8080").unwrap();
        assert_eq!(config.app_name, "watchcow.my-web");
        assert_eq!(config.display_name, "My_Web");
    }

    #[tokio::test]
    async fn test_delete_removes_config_and_triggers_uninstall() {
        let dir = TempDir::new().unwrap();
        let (state, trigger) = test_state(&dir, vec![container("aaa111222333", "web", false)]);
        let store = state.store.clone();

        store
            .set(StoredConfig {
                key: ContainerKey::from("nginx:alpine|80:8080"),
                app_name: "watchcow.myweb".to_string(),
                ..Default::default()
            })
            .unwrap();

        let (status, _) = send(
            state,
            HttpRequest::builder()
                .method("DELETE")
                .uri("/containers/aaa111222333")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(store.get_by_key("nginx:alpine|80:8080").is_none());

        let uninstalls = trigger.uninstalls.lock().unwrap();
        assert_eq!(
            uninstalls.as_slice(),
            &[("aaa111222333".to_string(), "watchcow.myweb".to_string())]
        );
    }

    #[tokio::test]
    async fn test_save_multipart_with_icon() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir, vec![container("aaa111222333", "web", false)]);
        let store = state.store.clone();

        // Minimal 1x1 PNG
        let mut png = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image::RgbaImage::new(1, 1))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let png = png.into_inner();

        let boundary = "watchcowtestboundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"appname\"\r\n\r\nwatchcow.web\r\n--{b}\r\nContent-Disposition: form-data; name=\"icon\"; filename=\"icon.png\"\r\nContent-Type: image/png\r\n\r\n",
                b = boundary
            )
            .as_bytes(),
        );
        body.extend_from_slice(&png);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        let (status, reply) = send(
            state,
            HttpRequest::builder()
                .method("POST")
                .uri("/containers/aaa111222333")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK, "body: {}", reply);

        let config = store.get_by_key("nginx:alpine|80:8080").unwrap();
        assert_eq!(config.app_name, "watchcow.web");
        assert!(!config.icon_base64.is_empty());
        // The stored icon is a 256 pixel PNG
        let decoded = BASE64.decode(&config.icon_base64).unwrap();
        let img = image::load_from_memory(&decoded).unwrap();
        assert_eq!(image::GenericImageView::dimensions(&img), (256, 256));
    }
}
