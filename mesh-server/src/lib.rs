//! HTTP surface of the toolmesh orchestrator.
//!
//! [`router`] exposes the chat pipeline and the tool registry:
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /api/chat` | answer one message |
//! | `POST /api/tools/register` | upsert a tool by name |
//! | `POST /api/tools/heartbeat` | refresh a tool's liveness |
//! | `POST /api/tools/deregister` | mark a tool inactive |
//! | `GET /api/tools` | live tool snapshot |
//! | `GET /api/health` | registry probe |
//!
//! [`Server`] runs the router on a bound listener until told to stop;
//! [`wiring`] assembles the orchestrator from a [`mesh_config::ServiceConfig`].

#![warn(missing_docs, clippy::pedantic)]

mod chat;
mod error;
mod health;
mod tools;
pub mod wiring;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use mesh_orchestrator::ChatOrchestrator;
use mesh_registry::ToolRegistry;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use error::ApiError;

/// Shared state handed to every route.
#[derive(Debug)]
pub struct ServerState {
    orchestrator: ChatOrchestrator,
}

impl ServerState {
    /// Wraps an orchestrator.
    #[must_use]
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Returns the orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    fn registry(&self) -> &Arc<dyn ToolRegistry> {
        self.orchestrator.registry()
    }
}

/// Builds the API router.
#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/tools", get(tools::list))
        .route("/api/tools/register", post(tools::register))
        .route("/api/tools/heartbeat", post(tools::heartbeat))
        .route("/api/tools/deregister", post(tools::deregister))
        .route("/api/health", get(health::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Running HTTP server; stops when shut down or dropped.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl Server {
    /// Binds `bind` and starts serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the address cannot be bound.
    pub async fn start(bind: SocketAddr, state: Arc<ServerState>) -> io::Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        info!(%addr, "api listening");

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Asks the server to stop accepting connections and drain.
    pub fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            if sender.send(()).is_err() {
                debug!("server task already stopped");
            }
        }
    }

    /// Waits for the serving task to finish.
    ///
    /// # Errors
    ///
    /// Returns the serve error, or an error when the task panicked.
    pub async fn wait(mut self) -> io::Result<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(io::Error::other)?,
            None => Ok(()),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
