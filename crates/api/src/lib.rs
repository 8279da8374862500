pub mod error;
pub mod registry;
pub mod response;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod upstream;

pub use error::{GatewayError, UpstreamError};
pub use registry::{AccountSummary, Registry, RegistryEntry};
pub use response::ApiResponse;
pub use state::{AppState, GatewaySettings};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .fallback(routes::route_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Last-resort handler for anything that escaped a route handler.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };
    tracing::error!(error = %detail, "Server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::failure("Internal server error", Some(detail))),
    )
        .into_response()
}

/// Start the API server, then sweep open connections once it has shut down.
pub async fn start_server(state: Arc<AppState>, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("API server listening on {}", local_addr);
    tracing::info!("Health check: http://{}/api/health", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    shutdown::disconnect_all(&state).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
