use super::state::AppState;
use crate::config::Settings;
use crate::error::LiveError;
use crate::graph::GraphNode;
use crate::session::SessionStats;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

/// 400 for settings problems, 500 for everything else
fn status_for(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<LiveError>() {
        Some(e) if e.is_configuration() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /live/start
pub async fn start_live(State(state): State<AppState>) -> impl IntoResponse {
    info!("Start requested over HTTP");

    if let Err(e) = state.manager.start().await {
        error!("Failed to start live session: {:#}", e);
        return error_response(status_for(&e), format!("{:#}", e));
    }

    (
        StatusCode::OK,
        Json(LiveResponse {
            status: "started".to_string(),
            message: "Live session started".to_string(),
            stats: state.manager.stats(),
        }),
    )
        .into_response()
}

/// POST /live/stop
pub async fn stop_live(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stop requested over HTTP");
    state.manager.stop().await;

    (
        StatusCode::OK,
        Json(LiveResponse {
            status: "stopped".to_string(),
            message: "Live session stopped".to_string(),
            stats: state.manager.stats(),
        }),
    )
}

/// GET /live/status
pub async fn live_status(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.manager.stats())
}

/// GET /graph/nodes
pub async fn graph_nodes(State(state): State<AppState>) -> Json<Vec<GraphNode>> {
    Json(state.manager.graph_nodes())
}

/// GET /config
pub async fn get_config(State(state): State<AppState>) -> Json<Settings> {
    Json(state.config.get())
}

/// PUT /config
/// Replace the settings; the config supervisor applies them to the session
pub async fn put_config(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> impl IntoResponse {
    match state.config.update(settings) {
        Ok(()) => (StatusCode::OK, Json(state.config.get())).into_response(),
        Err(e) => {
            warn!("Rejected settings update: {}", e);
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// GET /events
/// Server-sent events mirroring the event sink
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let event = Event::default()
                        .event(envelope.name)
                        .data(envelope.payload.to_string());
                    return Some((Ok(event), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = events.take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
