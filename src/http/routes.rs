use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/live/start", post(handlers::start_live))
        .route("/live/stop", post(handlers::stop_live))
        .route("/live/status", get(handlers::live_status))
        // Queries
        .route("/graph/nodes", get(handlers::graph_nodes))
        .route(
            "/config",
            get(handlers::get_config).put(handlers::put_config),
        )
        .route("/events", get(handlers::event_stream))
        // The overlay frontend is served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
