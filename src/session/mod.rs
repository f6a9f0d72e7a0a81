//! Live session management
//!
//! `LiveSessionManager` owns one streaming session at a time:
//! - Audio capture feeding the packetizer and a bounded frame queue
//! - Sender and receiver tasks on the current transport
//! - Single-flight reconnection with resume tokens
//! - Dispatch of inbound messages to events, the screenshot tool and the graph
//! - Reacting to settings changes (`spawn_config_supervisor`)

mod config;
mod dispatch;
mod manager;
mod state;
mod stats;
mod supervisor;

pub use config::SessionConfig;
pub use dispatch::{ConversationRound, MessageDispatcher};
pub use manager::LiveSessionManager;
pub use state::{AtomicSessionState, SessionSlot, SessionState};
pub use stats::SessionStats;
pub use supervisor::spawn_config_supervisor;
