//! Container lifecycle controller
//!
//! Subscribes to Docker events, reconciles containers with installed apps,
//! and drives the installer. All state transitions flow through a single
//! worker task fed by a bounded operation queue: the worker is the only
//! code that mutates the container map, touches the registry, or calls the
//! installer, so operations are totally ordered and installer calls never
//! overlap.

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::app::{default_app_name, Status};
use crate::docker::{ContainerEvent, ContainerSummaryInfo, DockerClient};
use crate::generator::{app_from_labels, app_from_stored, get_label, Generator};
use crate::installer::Installer;
use crate::registry::Registry;
use crate::store::{ConfigStore, ContainerKey, StoredConfig};

/// Bound on the operation queue. Overflow drops the operation; a missed one
/// is rediscovered by the next scan or event.
pub const OP_QUEUE_CAPACITY: usize = 100;

/// Delay before inspecting a freshly started container, letting port
/// bindings and mounts stabilize.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Sleep before re-subscribing after an event stream error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// A unit of work for the operation worker.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub container_id: String,
    pub container_name: String,
    pub labels: HashMap<String, String>,
    pub stored_config: Option<StoredConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    ContainerStart,
    ContainerStop,
    ContainerDestroy,
    DashboardInstall,
}

/// Coarse container state as tracked by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoarseState {
    Running,
    Exited,
}

/// Per-container record, owned exclusively by the worker.
#[derive(Debug)]
#[allow(dead_code)]
struct ContainerState {
    name: String,
    image: String,
    state: CoarseState,
    /// App overlay: the name this container installs under
    app_name: String,
    installed: bool,
}

/// Adoption predicate for label-configured containers: `watchcow.enable`
/// must be `true` and `watchcow.install`, when set, must be one of the
/// install-as-app modes.
pub fn should_install(labels: &HashMap<String, String>) -> bool {
    if labels.get("watchcow.enable").map(String::as_str) != Some("true") {
        return false;
    }
    matches!(
        labels.get("watchcow.install").map(String::as_str),
        None | Some("") | Some("true") | Some("fnos")
    )
}

/// Cloneable entry point into the controller: enqueues operations and
/// answers dashboard queries.
#[derive(Clone)]
pub struct ControllerHandle {
    ops_tx: mpsc::Sender<Operation>,
    docker: DockerClient,
}

impl ControllerHandle {
    /// Enqueues an operation; on a full queue the operation is dropped with
    /// a warning (the next scan or event rediscovers the work).
    pub fn enqueue(&self, op: Operation) {
        if let Err(e) = self.ops_tx.try_send(op) {
            warn!(error = %e, "Operation queue full, dropping operation");
        }
    }

    /// Dashboard install trigger: re-runs the start path with the saved
    /// configuration.
    pub fn trigger_install(&self, container_id: &str, container_name: &str, config: StoredConfig) {
        self.enqueue(Operation {
            kind: OpKind::DashboardInstall,
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            labels: HashMap::new(),
            stored_config: Some(config),
        });
    }

    /// Dashboard uninstall trigger. The destroy path resolves the app from
    /// the carried config when the container is no longer tracked.
    pub fn trigger_uninstall(&self, container_id: &str, config: StoredConfig) {
        self.enqueue(Operation {
            kind: OpKind::ContainerDestroy,
            container_id: container_id.to_string(),
            container_name: String::new(),
            labels: HashMap::new(),
            stored_config: Some(config),
        });
    }

    /// Lists all containers for the dashboard.
    pub async fn list_all_containers(&self) -> crate::error::Result<Vec<ContainerSummaryInfo>> {
        self.docker.list_all().await
    }
}

/// The lifecycle controller. [`Controller::run`] consumes it and blocks
/// until shutdown.
pub struct Controller {
    docker: DockerClient,
    handle: ControllerHandle,
    ops_rx: mpsc::Receiver<Operation>,
    worker: Worker,
}

impl Controller {
    pub fn new(
        docker: DockerClient,
        registry: Arc<Registry>,
        store: Arc<ConfigStore>,
        generator: Arc<Generator>,
        installer: Option<Installer>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(OP_QUEUE_CAPACITY);
        let handle = ControllerHandle {
            ops_tx,
            docker: docker.clone(),
        };

        if installer.is_none() {
            warn!("appcenter-cli not found, running without installing apps");
        }

        Self {
            docker: docker.clone(),
            handle,
            ops_rx,
            worker: Worker {
                docker,
                registry,
                store,
                generator,
                installer,
                containers: HashMap::new(),
            },
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Runs the controller: initial scan, event subscription, and the
    /// operation worker. Returns when `shutdown` fires.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self {
            docker,
            handle,
            ops_rx,
            mut worker,
        } = self;

        // One-shot scan: enqueue a start for every running container; the
        // worker decides adoption
        let scan_handle = handle.clone();
        let scan_docker = docker.clone();
        tokio::spawn(async move {
            initial_scan(scan_docker, scan_handle).await;
        });

        let events_handle = handle.clone();
        let events_shutdown = shutdown.clone();
        tokio::spawn(async move {
            event_loop(docker, events_handle, events_shutdown).await;
        });

        worker.run(ops_rx, shutdown).await;
    }
}

async fn initial_scan(docker: DockerClient, handle: ControllerHandle) {
    match docker.list_all().await {
        Ok(containers) => {
            let running = containers
                .into_iter()
                .filter(|c| c.state == "running")
                .collect::<Vec<_>>();
            info!(count = running.len(), "Initial scan found running containers");
            for c in running {
                handle.enqueue(Operation {
                    kind: OpKind::ContainerStart,
                    container_id: c.id,
                    container_name: c.name,
                    labels: c.labels,
                    stored_config: None,
                });
            }
        }
        Err(e) => warn!(error = %e, "Initial container scan failed"),
    }
}

/// Subscribes to the Docker event stream, converting lifecycle events into
/// operations. Any stream error tears the subscription down and re-creates
/// it after a backoff.
async fn event_loop(
    docker: DockerClient,
    handle: ControllerHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let mut events = docker.events();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Event subscriber shutting down");
                    return;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(message)) => {
                            if let Some(event) = ContainerEvent::from_message(&message) {
                                debug!(action = event.action, container = event.name, "Docker event");
                                if let Some(op) = operation_for_event(&event) {
                                    handle.enqueue(op);
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Docker event stream error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("Docker event stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

/// Maps a container event to an operation.
fn operation_for_event(event: &ContainerEvent) -> Option<Operation> {
    let kind = match event.action.as_str() {
        "start" => OpKind::ContainerStart,
        "stop" | "die" => OpKind::ContainerStop,
        "destroy" => OpKind::ContainerDestroy,
        _ => return None,
    };
    Some(Operation {
        kind,
        container_id: event.id.clone(),
        container_name: event.name.clone(),
        labels: HashMap::new(),
        stored_config: None,
    })
}

/// The single-writer operation worker.
struct Worker {
    docker: DockerClient,
    registry: Arc<Registry>,
    store: Arc<ConfigStore>,
    generator: Arc<Generator>,
    installer: Option<Installer>,
    containers: HashMap<String, ContainerState>,
}

impl Worker {
    async fn run(&mut self, mut ops_rx: mpsc::Receiver<Operation>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Operation worker shutting down");
                    return;
                }
                op = ops_rx.recv() => {
                    match op {
                        Some(op) => self.handle_operation(op).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_operation(&mut self, op: Operation) {
        match op.kind {
            OpKind::ContainerStart | OpKind::DashboardInstall => self.handle_start(op).await,
            OpKind::ContainerStop => self.handle_stop(op).await,
            OpKind::ContainerDestroy => self.handle_destroy(op).await,
        }
    }

    /// The start/install path. Waits out the settle delay, decides
    /// adoption, reconciles against the installer, and only generates a
    /// package when the app is not already installed.
    async fn handle_start(&mut self, op: Operation) {
        tokio::time::sleep(SETTLE_DELAY).await;

        let details = match self.docker.inspect(&op.container_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!(container = op.container_name, error = %e, "Container disappeared before inspection, aborting");
                self.containers.remove(&op.container_id);
                return;
            }
        };

        let key = ContainerKey::new(&details.image, &details.ports);
        let label_adopted = should_install(&details.labels);
        let stored = op
            .stored_config
            .clone()
            .or_else(|| self.store.get_by_key(key.as_str()));

        if !label_adopted && stored.is_none() {
            debug!(container = details.name, "Container not adopted");
            return;
        }

        // Label-configured containers are the source of truth for their own
        // configuration
        let stored = if label_adopted { None } else { stored };

        let app = match &stored {
            Some(config) => app_from_stored(&details, config),
            None => app_from_labels(&details),
        };
        let app_name = app.app_name.clone();

        self.containers.insert(
            op.container_id.clone(),
            ContainerState {
                name: details.name.clone(),
                image: details.image.clone(),
                state: CoarseState::Running,
                app_name: app_name.clone(),
                installed: false,
            },
        );

        let Some(installer) = self.installer.clone() else {
            // No appcenter on this host: track and expose the app, skip
            // generation and installation entirely
            debug!(app = app_name, "Installer unavailable, registering without install");
            let mut app = app;
            app.status = Some(Status::Running);
            self.registry.register(app);
            return;
        };

        if installer.is_installed(&app_name).await {
            // Already installed: reconcile by starting it and rebuilding
            // the registry entry, no package needed
            info!(app = app_name, "App already installed, starting");
            if let Err(e) = installer.start(&app_name).await {
                warn!(app = app_name, error = %e, "Failed to start installed app");
            }
            let mut app = app;
            app.status = Some(Status::Running);
            self.registry.register(app);
            if let Some(state) = self.containers.get_mut(&op.container_id) {
                state.installed = true;
            }
            return;
        }

        let generated = self
            .generator
            .generate_from_details(&details, stored.as_ref())
            .await;

        match generated {
            Ok((mut app, package_dir)) => {
                match installer.install_local(package_dir.path()).await {
                    Ok(()) => {
                        info!(app = app.app_name, "App installed");
                        app.status = Some(Status::Running);
                        self.registry.register(app);
                        if let Some(state) = self.containers.get_mut(&op.container_id) {
                            state.installed = true;
                        }
                    }
                    Err(e) => {
                        warn!(app = app.app_name, error = %e, "Install failed, container stays uninstalled");
                        self.containers.remove(&op.container_id);
                    }
                }
                // package_dir drops here, removing the temp directory on
                // both outcomes
            }
            Err(e) => {
                warn!(app = app_name, error = %e, "Package generation failed");
                self.containers.remove(&op.container_id);
            }
        }
    }

    async fn handle_stop(&mut self, op: Operation) {
        let Some(state) = self.containers.get_mut(&op.container_id) else {
            return;
        };
        state.state = CoarseState::Exited;

        debug!(container = %state.name, "Container stopped");

        if !state.installed {
            return;
        }
        let app_name = state.app_name.clone();

        if let Some(installer) = &self.installer {
            if let Err(e) = installer.stop(&app_name).await {
                warn!(app = app_name, error = %e, "Failed to stop app");
            }
        }
        self.registry.update_status(&app_name, Status::Stopped);
    }

    /// Destroy uninstalls and unregisters regardless of whether the stop
    /// that preceded it was ever processed; registry and state bookkeeping
    /// proceed even when the installer fails.
    async fn handle_destroy(&mut self, op: Operation) {
        let app_name = self
            .containers
            .get(&op.container_id)
            .map(|s| s.app_name.clone())
            .or_else(|| {
                self.registry
                    .get_by_container_id(&op.container_id)
                    .map(|a| a.app_name)
            })
            .or_else(|| {
                op.stored_config
                    .as_ref()
                    .map(|c| c.app_name.clone())
                    .filter(|n| !n.is_empty())
            })
            .or_else(|| {
                // Label-adopted container the daemon never tracked (e.g.
                // destroyed right after a restart)
                should_install(&op.labels).then(|| {
                    get_label(
                        &op.labels,
                        "watchcow.appname",
                        &default_app_name(&op.container_name),
                    )
                    .to_string()
                })
            });

        if let Some(app_name) = app_name {
            info!(app = app_name, container = op.container_id, "Container destroyed, uninstalling app");
            if let Some(installer) = &self.installer {
                // Permissive by contract: uninstall never fails the destroy
                let _ = installer.uninstall(&app_name).await;
            }
            self.registry.unregister(&app_name);
        }

        self.containers.remove(&op.container_id);
    }
}
