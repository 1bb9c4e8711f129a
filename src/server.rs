//! Unix-socket HTTP server
//!
//! Binds the daemon's HTTP surface to a Unix domain socket: stale socket
//! removal, world-accessible permissions for the web station, a readiness
//! signal the controller waits on, and a bounded graceful shutdown that
//! unlinks the socket on the way out.

use axum::Router;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Bound on handling a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// In-flight requests get this long to drain on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Merges the HTTP surface into one router with request tracing and a
/// per-request timeout.
pub fn build_router(redirect: Router, dashboard: Router) -> Router {
    redirect
        .merge(dashboard)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}

/// The Unix-socket HTTP server.
pub struct Server {
    socket_path: PathBuf,
    router: Router,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn new<P: Into<PathBuf>>(socket_path: P, router: Router) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            socket_path: socket_path.into(),
            router,
            ready_tx,
            ready_rx,
        }
    }

    /// A receiver that observes `true` once the socket is bound. Readers
    /// started after this can never see a half-initialized socket.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Serves until `shutdown` fires, then drains in-flight handlers for at
    /// most [`SHUTDOWN_TIMEOUT`] and removes the socket file.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            debug!(path = %self.socket_path.display(), "Removing stale socket file");
            fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o666))?;

        info!(path = %self.socket_path.display(), "Unix socket server started");
        let _ = self.ready_tx.send(true);

        let mut graceful_shutdown = shutdown.clone();
        let server = axum::serve(listener, self.router).with_graceful_shutdown(async move {
            let _ = graceful_shutdown.changed().await;
        });

        let mut drain_deadline = shutdown.clone();
        let deadline = async move {
            let _ = drain_deadline.changed().await;
            tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
        };

        tokio::select! {
            result = server => result?,
            _ = deadline => {
                warn!("Shutdown drain timed out, aborting in-flight requests");
            }
        }

        info!("Shutting down Unix socket server");
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e, "Failed to remove socket file");
            }
        }

        Ok(())
    }
}
