//! One-way notifications to the presentation layer.
//!
//! Emission never blocks and never fails from the caller's point of view.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::graph::GraphNode;

/// Values carried by `live:status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Disconnected,
}

impl LiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveStatus::Connecting => "connecting",
            LiveStatus::Connected => "connected",
            LiveStatus::Reconnecting => "reconnecting",
            LiveStatus::Error => "error",
            LiveStatus::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Status(LiveStatus),
    Error(String),
    Transcript(String),
    InterviewerDone,
    AiText(String),
    Done,
    Interrupted(String),
    GraphAddNode(GraphNode),
    GraphClear,
}

impl LiveEvent {
    /// Event name as seen by the frontend
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Status(_) => "live:status",
            LiveEvent::Error(_) => "live:error",
            LiveEvent::Transcript(_) => "live:transcript",
            LiveEvent::InterviewerDone => "live:interviewer-done",
            LiveEvent::AiText(_) => "live:ai-text",
            LiveEvent::Done => "live:done",
            LiveEvent::Interrupted(_) => "live:Interrupted",
            LiveEvent::GraphAddNode(_) => "graph:add-node",
            LiveEvent::GraphClear => "graph:clear",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            LiveEvent::Status(status) => json!(status.as_str()),
            LiveEvent::Error(text)
            | LiveEvent::Transcript(text)
            | LiveEvent::AiText(text)
            | LiveEvent::Interrupted(text) => json!(text),
            LiveEvent::GraphAddNode(node) => json!(node),
            LiveEvent::InterviewerDone | LiveEvent::Done | LiveEvent::GraphClear => Value::Null,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LiveEvent);
}

/// Event with its wire name, as delivered to broadcast subscribers
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub name: &'static str,
    pub payload: Value,
}

impl From<&LiveEvent> for EventEnvelope {
    fn from(event: &LiveEvent) -> Self {
        Self {
            name: event.name(),
            payload: event.payload(),
        }
    }
}

/// Publishes events on a tokio broadcast channel.
///
/// Lagging subscribers lose events; having no subscriber is not an error.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: LiveEvent) {
        let _ = self.tx.send(EventEnvelope::from(&event));
    }
}

/// Writes every event to the log
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: LiveEvent) {
        match &event {
            LiveEvent::Transcript(_) | LiveEvent::AiText(_) => {
                debug!("event {} {}", event.name(), event.payload())
            }
            _ => info!("event {} {}", event.name(), event.payload()),
        }
    }
}

/// Forwards each event to every inner sink
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: LiveEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
