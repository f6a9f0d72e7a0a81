//! Error types for the live session subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveError {
    // Configuration errors
    #[error("API key is not configured")]
    MissingCredential,

    #[error("Provider {provider} does not support live sessions")]
    LiveUnsupported { provider: String },

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    // Audio errors
    #[error("Ring buffer holds {available} bytes, {requested} requested")]
    InsufficientData { requested: usize, available: usize },

    #[error("Audio capture initialization failed: {0}")]
    CaptureInit(String),

    #[error("Audio capture start failed: {0}")]
    CaptureStart(String),

    // Session errors
    #[error("Reconnection failed after {attempts} attempts: {reason}")]
    ReconnectExhausted { attempts: u32, reason: String },

    #[error("Reconnection aborted by shutdown")]
    ReconnectAborted,

    #[error("No live session is active")]
    SessionNotActive,
}

impl LiveError {
    /// True for errors caused by settings rather than runtime conditions.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LiveError::MissingCredential
                | LiveError::LiveUnsupported { .. }
                | LiveError::InvalidConfig { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
