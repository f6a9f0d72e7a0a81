use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::SessionState;
use crate::audio::PipelineSnapshot;

/// Statistics about the live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub state: SessionState,

    /// Whether a transport is held and the session is not stopped
    pub active: bool,

    /// When the current session started
    pub started_at: Option<DateTime<Utc>>,

    /// Audio frames accepted by the transport
    pub frames_sent: u64,

    pub send_failures: u64,

    /// Successful reconnections
    pub reconnects: u64,

    /// Nodes currently in the conversation graph
    pub nodes: usize,

    pub audio: Option<PipelineSnapshot>,
}
