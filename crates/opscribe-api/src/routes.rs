//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, a body size limit and all
//! endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use opscribe_core::config::OpscribeConfig;
use opscribe_core::error::OpscribeError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Browser access only from pages served on the same local port.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/clients", post(handlers::create_client))
        .route("/clients/{id}", get(handlers::get_client))
        .route("/graphs", post(handlers::create_graph))
        .route(
            "/graphs/{id}",
            get(handlers::get_graph).delete(handlers::delete_graph),
        )
        .route("/graphs/{id}/nodes", post(handlers::create_node))
        .route("/graphs/{id}/edges", post(handlers::create_edge))
        .route("/graphs/{id}/ingest", post(handlers::ingest_graph))
        .route(
            "/nodes/{id}",
            get(handlers::get_node).delete(handlers::delete_node),
        )
        .route(
            "/edges/{id}",
            get(handlers::get_edge).delete(handlers::delete_edge),
        )
        .route("/retrieve", get(handlers::retrieve))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
///
/// Binds to 127.0.0.1 (localhost only) on the port from config.
pub async fn start_server(config: &OpscribeConfig, state: AppState) -> Result<(), OpscribeError> {
    let addr = format!("127.0.0.1:{}", config.general.port);

    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OpscribeError::Api(format!("Failed to bind: {}", e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| OpscribeError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
