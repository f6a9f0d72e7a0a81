//! LLM provider abstractions
//!
//! - `LlmProvider`: one-shot generation plus a live capability query
//! - `LiveProvider` / `LiveSession`: the duplex streaming contract the
//!   session manager drives
//! - `LlmService`: the swappable current provider

pub mod openai;
pub mod provider;
pub mod service;

pub use openai::OpenAiProvider;
pub use provider::{
    supports_live, LiveConfig, LiveMessage, LiveProvider, LiveSession, LlmProvider, Message,
    Role, Sampling, SCREENSHOT_TOOL,
};
pub use service::{provider_from_settings, LlmService};
