//! Status HTTP server.
//!
//! Exposes the supervisor's status snapshot as JSON on localhost for
//! monitoring tools. Observability only; the daemon never depends on it.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::{SharedStatus, StatusSnapshot};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status: the current snapshot as JSON.
async fn get_status(State(status): State<SharedStatus>) -> Json<StatusSnapshot> {
    let snapshot = status.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(status)
}

/// Runs the status HTTP server on 127.0.0.1 at the given port.
pub async fn run_status_server(status: SharedStatus, port: u16) -> Result<(), ServerError> {
    let app = create_status_router(status);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
