//! WatchCow
//!
//! A host daemon that adopts Docker containers as fnOS appcenter apps:
//! - Watches the Docker container lifecycle and shadows it with app
//!   install/start/stop/uninstall operations
//! - Generates app packages (manifest, UI config, icons, scripts) from
//!   container labels or dashboard-saved configurations
//! - Serves a configuration dashboard and a network-aware redirect page
//!   over a Unix socket, with a CGI shim for the web station

mod app;
mod cgi;
mod config;
mod controller;
mod dashboard;
mod docker;
mod error;
mod generator;
mod icons;
mod installer;
mod redirect;
mod registry;
mod server;
mod store;
mod templates;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::controller::Controller;
use crate::dashboard::DashboardState;
use crate::docker::DockerClient;
use crate::generator::Generator;
use crate::icons::IconResolver;
use crate::installer::Installer;
use crate::registry::Registry;
use crate::server::Server;
use crate::store::ConfigStore;

#[derive(Parser)]
#[command(name = "watchcow")]
#[command(about = "Adopts Docker containers as fnOS appcenter apps")]
#[command(version)]
struct Cli {
    /// Run mode; inferred from the process name when omitted (a name
    /// containing "cgi" selects CGI mode)
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Unix socket path (default: $TRIM_PKGVAR/watchcow.sock or
    /// /tmp/watchcow/watchcow.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, default_value = "/etc/watchcow/watchcow.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Server,
    Cgi,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mode = cli.mode.unwrap_or_else(|| {
        let process_name = std::env::args().next().unwrap_or_default();
        if process_name.contains("cgi") {
            Mode::Cgi
        } else {
            Mode::Server
        }
    });

    match mode {
        Mode::Cgi => run_cgi_mode(cli).await,
        Mode::Server => run_server_mode(cli).await,
    }
}

/// CGI mode: proxy one request to the daemon socket. No logging setup;
/// stdout is the CGI response.
async fn run_cgi_mode(cli: Cli) {
    let config = Config::load(Some(&cli.config)).unwrap_or_default();
    let socket_path = cli.socket.unwrap_or(config.socket_path);
    cgi::run(&socket_path).await;
}

/// Server mode: the monitoring daemon with the Unix-socket HTTP server.
async fn run_server_mode(cli: Cli) {
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(1);
    }

    info!("WatchCow - fnOS app generator for Docker");

    let mut config = match Config::load(Some(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    // Connect to Docker and verify the daemon is there
    let docker = match DockerClient::connect(&config.docker_socket) {
        Ok(docker) => docker,
        Err(e) => {
            error!(error = %e, "Failed to create Docker client");
            std::process::exit(1);
        }
    };
    match docker.ping().await {
        Ok(()) => info!("Connected to Docker daemon"),
        Err(e) => {
            error!(error = %e, "Failed to connect to Docker");
            std::process::exit(1);
        }
    }

    let store = match ConfigStore::open(&config.store_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to open configuration store");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(Registry::new());
    let resolver = IconResolver::new(
        config.icon_cdn_template.clone(),
        config.data_share_path.clone(),
    );
    let generator = Arc::new(Generator::new(docker.clone(), resolver));

    // A missing appcenter CLI is fine; the controller degrades to watching
    let installer = match Installer::discover() {
        Ok(installer) => {
            info!(path = %installer.cli_path().display(), "Found appcenter-cli");
            Some(installer)
        }
        Err(e) => {
            warn!(error = %e, "Running without installer");
            None
        }
    };

    let controller = Controller::new(
        docker,
        registry.clone(),
        store.clone(),
        generator,
        installer,
    );
    let handle = controller.handle();

    let dashboard_state = DashboardState {
        store,
        lister: Arc::new(handle.clone()),
        trigger: Arc::new(handle),
    };
    let router = server::build_router(
        redirect::router(registry),
        dashboard::router(dashboard_state),
    );

    let http_server = Server::new(&config.socket_path, router);
    let mut ready = http_server.ready();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let server_task = tokio::spawn(http_server.run(shutdown_rx.clone()));

    // The controller starts only once the socket is live
    if ready.wait_for(|ready| *ready).await.is_err() {
        match server_task.await {
            Ok(Err(e)) => error!(error = %e, "HTTP server failed to start"),
            Ok(Ok(())) => error!("HTTP server exited before becoming ready"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }
        std::process::exit(1);
    }

    info!("Monitoring started (Ctrl+C to stop)");
    info!("To adopt a container, add these labels:");
    info!("  watchcow.enable: \"true\"");
    info!("  watchcow.display_name: \"Your App Name\"");
    info!("  watchcow.service_port: \"8080\"");

    controller.run(shutdown_rx).await;

    info!("Shutting down...");
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error during shutdown"),
        Err(e) => warn!(error = %e, "HTTP server task panicked"),
    }
}

/// Translates SIGINT/SIGTERM into the shutdown signal.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }

        let _ = shutdown_tx.send(true);
    });
}
