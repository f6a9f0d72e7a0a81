pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod http;
pub mod llm;
pub mod nats;
pub mod screenshot;
pub mod session;

pub use audio::{
    AudioFile, AudioFrame, AudioPipeline, AudioSource, AudioSourceFactory, CaptureFactory,
    CaptureSink, CaptureSource, PipelineConfig, RingBuffer, WavFileCapture,
};
pub use config::{Config, ConfigStore, Settings};
pub use error::LiveError;
pub use events::{BroadcastSink, EventSink, FanoutSink, LiveEvent, LiveStatus, LogSink};
pub use graph::{ConversationGraph, GraphNode};
pub use http::{create_router, AppState};
pub use llm::{LiveConfig, LiveMessage, LiveProvider, LiveSession, LlmProvider, LlmService};
pub use nats::GatewayProvider;
pub use screenshot::{FileScreenshotProvider, PreviewOptions, ScreenshotProvider};
pub use session::{
    spawn_config_supervisor, LiveSessionManager, SessionConfig, SessionState, SessionStats,
};
