use crate::config::ConfigStore;
use crate::events::BroadcastSink;
use crate::session::LiveSessionManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LiveSessionManager>,

    pub config: Arc<ConfigStore>,

    /// Source of the `/events` stream
    pub events: BroadcastSink,

    /// Ends open event streams so graceful shutdown can finish
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        manager: Arc<LiveSessionManager>,
        config: Arc<ConfigStore>,
        events: BroadcastSink,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            manager,
            config,
            events,
            shutdown,
        }
    }
}
