//! HTTP API for controlling the live session
//!
//! - GET /health - Health check
//! - POST /live/start - Start the live session
//! - POST /live/stop - Stop the live session
//! - GET /live/status - Session statistics
//! - GET /graph/nodes - Conversation graph nodes
//! - GET /config, PUT /config - Read or replace settings
//! - GET /events - Server-sent event stream

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
