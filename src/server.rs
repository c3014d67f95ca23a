//! HTTP server hosting the gated application routes.

use std::net::SocketAddr;

use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{Result, TurnstileError};
use crate::gate::Gate;
use crate::ratelimit::AdmissionBackend;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn landing() -> Html<&'static str> {
    Html("<h1>Photo restoration</h1><p>Upload a photo to get started.</p>")
}

async fn blocked() -> Html<&'static str> {
    Html("<h1>Slow down</h1><p>Too many requests. Please wait a few seconds and try again.</p>")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the application routes behind `gate`.
pub fn app_router<R: AdmissionBackend + 'static>(gate: Gate<R>) -> Router {
    let routes = Router::new()
        .route("/", get(landing))
        .route("/blocked", get(blocked))
        .route("/health", get(health));
    gate.layer(routes)
}

/// HTTP server for the gated application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// Peer addresses are exposed to the gate through `ConnectInfo`. The server
    /// stops accepting connections when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind listener");
            TurnstileError::Io(e)
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}
