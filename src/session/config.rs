use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::PipelineConfig;

/// Tuning for a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture sample rate (mono, 16-bit)
    pub sample_rate: u32,

    pub bytes_per_sample: u32,

    /// Duration of one audio frame
    /// Default: 30 milliseconds
    pub frame_ms: u64,

    /// Bounded audio queue capacity, in frames
    pub queue_capacity: usize,

    /// Ring buffer capacity, in frames
    pub ring_frames: usize,

    /// Consecutive send failures before the sender asks for a reconnect
    pub send_failure_threshold: u32,

    pub reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,

    /// Sleep of the sender while a reconnect is in progress
    pub reconnect_poll_ms: u64,

    /// Rounds buffered before the graph is summarized
    pub graph_trigger_round: usize,

    pub summarize_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bytes_per_sample: 2,
            frame_ms: 30,
            queue_capacity: 100,
            ring_frames: 200,
            send_failure_threshold: 3,
            reconnect_attempts: 3,
            reconnect_delay_ms: 1000,
            reconnect_poll_ms: 10,
            graph_trigger_round: 3,
            summarize_timeout_secs: 30,
        }
    }
}

impl SessionConfig {
    /// Bytes in one frame: sample rate × bytes per sample × frame duration
    pub fn frame_bytes(&self) -> usize {
        (self.sample_rate as u64 * self.bytes_per_sample as u64 * self.frame_ms / 1000) as usize
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let frame_bytes = self.frame_bytes().max(1);
        PipelineConfig {
            frame_duration: Duration::from_millis(self.frame_ms.max(1)),
            frame_bytes,
            queue_capacity: self.queue_capacity.max(1),
            ring_capacity: frame_bytes * self.ring_frames.max(1),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms.max(1))
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }
}
