use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::ConfigStore;
use crate::events::{EventSink, LiveEvent};
use crate::graph::ConversationGraph;
use crate::llm::{LiveMessage, LiveSession, SCREENSHOT_TOOL};
use crate::screenshot::{decode_data_url, PreviewOptions, ScreenshotProvider};

/// Question/answer text of the turn in progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationRound {
    pub question: String,
    pub answer: String,
}

/// Routes inbound live messages to the event sink, the graph and the
/// screenshot tool.
pub struct MessageDispatcher {
    round: Mutex<ConversationRound>,
    graph: Arc<ConversationGraph>,
    events: Arc<dyn EventSink>,
    screenshots: Arc<dyn ScreenshotProvider>,
    config: Arc<ConfigStore>,
}

impl MessageDispatcher {
    pub fn new(
        graph: Arc<ConversationGraph>,
        events: Arc<dyn EventSink>,
        screenshots: Arc<dyn ScreenshotProvider>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            round: Mutex::new(ConversationRound::default()),
            graph,
            events,
            screenshots,
            config,
        }
    }

    fn round(&self) -> MutexGuard<'_, ConversationRound> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the accumulators
    pub fn current_round(&self) -> ConversationRound {
        self.round().clone()
    }

    /// Discard the turn in progress
    pub fn reset(&self) {
        *self.round() = ConversationRound::default();
    }

    /// Handle one message. `session` is the transport it arrived on; tool
    /// results go back through it.
    pub async fn dispatch(&self, session: &dyn LiveSession, message: LiveMessage) {
        match message {
            LiveMessage::Transcript(text) => {
                self.round().question.push_str(&text);
                self.events.emit(LiveEvent::Transcript(text));
            }
            LiveMessage::InterviewerDone => {
                self.events.emit(LiveEvent::InterviewerDone);
            }
            LiveMessage::AiText(text) => {
                self.round().answer.push_str(&text);
                self.events.emit(LiveEvent::AiText(text));
            }
            LiveMessage::ToolCall { name, id } => {
                if name == SCREENSHOT_TOOL {
                    self.fulfil_screenshot(session, &id).await;
                } else {
                    warn!("Ignoring call to unknown tool {} (id={})", name, id);
                }
            }
            LiveMessage::TurnDone => {
                self.events.emit(LiveEvent::Done);
                let round = std::mem::take(&mut *self.round());
                if !round.question.is_empty() && !round.answer.is_empty() {
                    self.graph.push(round.question, round.answer);
                } else {
                    debug!("Turn finished with an empty side, not summarized");
                }
            }
            LiveMessage::Interrupted(text) => {
                self.reset();
                self.events.emit(LiveEvent::Interrupted(text));
            }
            LiveMessage::Error(text) => {
                warn!("Live backend error: {}", text);
                self.events.emit(LiveEvent::Error(text));
            }
            LiveMessage::GoAway => {
                debug!("GoAway reached the dispatcher, ignored");
            }
        }
    }

    async fn fulfil_screenshot(&self, session: &dyn LiveSession, id: &str) {
        info!("Screenshot requested by the model (id={})", id);

        let failure = match self.capture().await {
            Ok((mime, image)) => {
                match session.send_tool_response_with_image(id, &image, &mime).await {
                    Ok(()) => return,
                    Err(e) => format!("Failed to send screenshot: {:#}", e),
                }
            }
            Err(e) => format!("Screenshot failed: {:#}", e),
        };

        warn!("{}", failure);
        if let Err(e) = session.send_tool_response(id, &failure).await {
            warn!("Failed to send tool error response: {:#}", e);
        }
    }

    async fn capture(&self) -> Result<(String, Vec<u8>)> {
        let options = PreviewOptions::from_settings(&self.config.get());
        let url = self.screenshots.capture_preview(&options).await?;
        decode_data_url(&url)
    }
}
