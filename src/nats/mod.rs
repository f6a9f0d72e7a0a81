pub mod client;
pub mod messages;

pub use client::{GatewayProvider, NatsLiveSession};
pub use messages::{AudioFrameMessage, ServerMessage, ToolResponseMessage};
