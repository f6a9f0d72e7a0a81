use serde::{Deserialize, Serialize};

use crate::llm::{LiveMessage, Message, Sampling};

/// Request to open a live session on the gateway (`live.session.open`)
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub session_id: String,
    pub api_key: String,
    pub model: String,
    pub system_instruction: String,
    pub sampling: Sampling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    /// Tool names the model may call
    pub tools: Vec<String>,
}

/// Gateway reply to [`OpenSessionRequest`]
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenSessionReply {
    pub session_id: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Audio frame published to the gateway (`live.<id>.audio`)
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u64,
    pub pcm: String,  // Base64-encoded PCM bytes
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: String,  // RFC3339 timestamp
}

/// Message pushed by the gateway (`live.<id>.events`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcript { text: String },
    InterviewerDone,
    AiText { text: String },
    ToolCall { name: String, id: String },
    TurnComplete,
    Interrupted {
        #[serde(default)]
        text: String,
    },
    Error { message: String },
    GoAway {
        #[serde(default)]
        time_left_ms: Option<u64>,
    },
    /// Session resumption bookkeeping; never surfaced to the dispatcher
    Resumption {
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        resumable: bool,
    },
}

impl ServerMessage {
    /// Map to the dispatcher's message type; bookkeeping and empty text yield `None`.
    pub fn into_live(self) -> Option<LiveMessage> {
        match self {
            ServerMessage::Transcript { text } if !text.is_empty() => {
                Some(LiveMessage::Transcript(text))
            }
            ServerMessage::AiText { text } if !text.is_empty() => Some(LiveMessage::AiText(text)),
            ServerMessage::Transcript { .. } | ServerMessage::AiText { .. } => None,
            ServerMessage::InterviewerDone => Some(LiveMessage::InterviewerDone),
            ServerMessage::ToolCall { name, id } => Some(LiveMessage::ToolCall { name, id }),
            ServerMessage::TurnComplete => Some(LiveMessage::TurnDone),
            ServerMessage::Interrupted { text } => Some(LiveMessage::Interrupted(text)),
            ServerMessage::Error { message } => Some(LiveMessage::Error(message)),
            ServerMessage::GoAway { .. } => Some(LiveMessage::GoAway),
            ServerMessage::Resumption { .. } => None,
        }
    }
}

/// Tool result published to the gateway (`live.<id>.tool`)
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResponseMessage {
    Text {
        id: String,
        content: String,
    },
    Image {
        id: String,
        mime_type: String,
        data: String,  // Base64-encoded image bytes
    },
}

/// One-shot generation request (`llm.generate`)
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateReply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
