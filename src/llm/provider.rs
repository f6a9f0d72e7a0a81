use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Settings;

/// Name of the tool the live model calls to look at the user's screen.
pub const SCREENSHOT_TOOL: &str = "get_screenshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Plain-text chat message for one-shot generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Structured message received from a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMessage {
    /// Transcription of the interviewer's speech
    Transcript(String),
    /// Interviewer finished speaking; the model is about to answer
    InterviewerDone,
    /// Transcription of the model's answer
    AiText(String),
    /// The model requests a tool result
    ToolCall { name: String, id: String },
    /// The model finished its turn
    TurnDone,
    /// The model's answer was cut off by new speech
    Interrupted(String),
    /// Backend-reported error
    Error(String),
    /// The backend is about to drop the connection
    GoAway,
}

/// Sampling parameters forwarded to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,
}

/// Parameters for opening a live session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    pub model: String,
    pub system_instruction: String,
    pub sampling: Sampling,
    /// Resume token from a previous session, if the backend issued one
    pub resume_token: Option<String>,
}

const COPILOT_INSTRUCTION: &str = "\
# Role
You are an interview copilot. You assist the candidate directly; you never talk to the interviewer.

# Goal
Listen to the interview in real time and give short, high-quality answers or talking points \
the candidate can repeat.

# Rules
1. Wait for a clear question or an obvious pause before answering. Never interrupt.
2. Speak to the candidate: start with \"You could say...\" or give concise bullet points.
3. If the interviewer refers to code, diagrams or text on screen, call get_screenshot immediately.
4. Structure answers as first point, second point, conclusion. Use the key technical terms.
5. If you are unsure, suggest a clarifying question instead of guessing. If the audio is \
unclear, say so.";

impl LiveConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let system_instruction = if settings.prompt.trim().is_empty() {
            COPILOT_INSTRUCTION.to_string()
        } else {
            format!(
                "{}\n\n# User Preferences\n{}",
                COPILOT_INSTRUCTION, settings.prompt
            )
        };

        Self {
            model: settings.model.clone(),
            system_instruction,
            sampling: Sampling {
                temperature: settings.temperature,
                top_p: settings.top_p,
                top_k: settings.top_k,
                max_tokens: settings.max_tokens,
            },
            resume_token: None,
        }
    }
}

/// One open duplex streaming connection to a live backend.
///
/// All methods take `&self`: the sender and receiver tasks use the same
/// session concurrently, and `close` must unblock a pending `receive`.
#[async_trait::async_trait]
pub trait LiveSession: Send + Sync {
    /// Send one frame of 16kHz mono PCM
    async fn send_audio(&self, pcm: &[u8]) -> Result<()>;

    /// Wait for the next message. `Ok(None)` means a message with nothing to
    /// act on (for example a bookkeeping message); callers just loop.
    async fn receive(&self) -> Result<Option<LiveMessage>>;

    async fn send_tool_response(&self, id: &str, text: &str) -> Result<()>;

    async fn send_tool_response_with_image(&self, id: &str, image: &[u8], mime_type: &str)
        -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Whether the backend issued a handle that can resume this session
    fn is_resumable(&self) -> bool {
        false
    }

    fn resume_token(&self) -> Option<String> {
        None
    }
}

/// Capability of opening live sessions
#[async_trait::async_trait]
pub trait LiveProvider: Send + Sync {
    async fn connect_live(&self, config: &LiveConfig) -> Result<Arc<dyn LiveSession>>;
}

/// LLM backend
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages
    fn name(&self) -> &str;

    /// One-shot generation with an explicit model; returns the assistant message
    async fn generate_content(&self, model: &str, messages: &[Message]) -> Result<Message>;

    /// Live capability query; `None` for request/response-only backends
    fn as_live(&self) -> Option<&dyn LiveProvider> {
        None
    }
}

pub fn supports_live(provider: &dyn LlmProvider) -> bool {
    provider.as_live().is_some()
}
