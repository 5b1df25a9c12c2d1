//! Axum serving for one endpoint.
//!
//! # Responsibilities
//! - Wire up the HTTP trace layer
//! - Attach peer addresses to requests
//! - Stop accepting on the shared shutdown signal

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(
    endpoint: &'static str,
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(endpoint, address = %addr, "Server starting");

    let app = router
        .layer(TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!(endpoint, "Shutdown signal received");
        })
        .await?;

    tracing::info!(endpoint, "Server stopped");
    Ok(())
}
