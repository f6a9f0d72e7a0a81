pub mod backend;
pub mod file;
pub mod pipeline;
pub mod ring_buffer;

#[cfg(feature = "cpal-audio")]
pub mod device;

pub use backend::{
    AudioSource, AudioSourceFactory, CaptureFactory, CaptureSink, CaptureSource,
    CAPTURE_SAMPLE_RATE,
};
pub use file::{AudioFile, WavFileCapture};
pub use pipeline::{AudioFrame, AudioPipeline, FrameQueue, PipelineConfig, PipelineSnapshot, PipelineStats};
pub use ring_buffer::RingBuffer;
