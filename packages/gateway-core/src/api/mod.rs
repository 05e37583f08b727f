//! HTTP/WebSocket API layer.
//!
//! This module contains a thin handler that delegates to the bootstrapped
//! [`GatewayServices`], plus router construction and server startup.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use thiserror::Error;

use crate::bootstrap::GatewayServices;

pub mod carrier_ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer. A thin `Arc` wrapper so
/// `axum`'s extractors can clone it cheaply per connection.
#[derive(Clone)]
pub struct GatewayState {
    pub services: Arc<GatewayServices>,
}

fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/stream", get(carrier_ws::carrier_ws_handler))
        .with_state(state)
}

/// Binds the configured port and serves the carrier media-stream endpoint
/// until the services' cancellation token fires.
pub async fn start_server(services: Arc<GatewayServices>, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[Server] listening on http://0.0.0.0:{port}");

    let cancel_token = services.cancel_token.clone();
    let state = GatewayState { services };
    let app = create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;
    Ok(())
}
