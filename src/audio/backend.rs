use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::pipeline::PipelineStats;
use super::ring_buffer::RingBuffer;

/// Sample rate every capture source must deliver (16-bit mono PCM).
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Destination for raw PCM delivered by a capture callback.
///
/// Cheap to clone; every clone writes into the same ring buffer. Delivery
/// never blocks and never fails: overflow is absorbed by the ring buffer.
#[derive(Clone)]
pub struct CaptureSink {
    ring: Arc<RingBuffer>,
    stats: Arc<PipelineStats>,
}

impl CaptureSink {
    pub(crate) fn new(ring: Arc<RingBuffer>, stats: Arc<PipelineStats>) -> Self {
        Self { ring, stats }
    }

    /// Append little-endian 16-bit PCM bytes.
    pub fn deliver(&self, pcm: &[u8]) {
        if pcm.is_empty() {
            return;
        }
        let stored = self.ring.write(pcm);
        self.stats
            .bytes_captured
            .fetch_add(stored as u64, Ordering::Relaxed);
    }

    /// Convenience for sources that produce i16 samples.
    pub fn deliver_samples(&self, samples: &[i16]) {
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.deliver(&pcm);
    }
}

/// Audio capture source trait
///
/// Implementations push 16 kHz mono PCM into the [`CaptureSink`] from
/// whatever thread or callback the device drives.
/// - WAV file replay (testing, demos)
/// - cpal input device (feature `cpal-audio`)
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Start delivering audio into `sink`
    async fn start(&mut self, sink: CaptureSink) -> Result<()>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Creates a fresh capture source for every session start.
pub trait CaptureFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn CaptureSource>>;
}

/// Audio source selection
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default input device (requires the `cpal-audio` feature)
    Device,
    /// Replay a WAV file at real-time pace
    File { path: PathBuf, looping: bool },
}

/// Factory mapping an [`AudioSource`] to a concrete capture source
pub struct AudioSourceFactory {
    source: AudioSource,
    created: AtomicU64,
}

impl AudioSourceFactory {
    pub fn new(source: AudioSource) -> Self {
        Self {
            source,
            created: AtomicU64::new(0),
        }
    }

    /// Number of sources handed out so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl CaptureFactory for AudioSourceFactory {
    fn create(&self) -> Result<Box<dyn CaptureSource>> {
        let source: Box<dyn CaptureSource> = match &self.source {
            AudioSource::File { path, looping } => {
                Box::new(super::file::WavFileCapture::open(path, *looping)?)
            }

            AudioSource::Device => {
                #[cfg(feature = "cpal-audio")]
                {
                    Box::new(super::device::CpalCapture::new()?)
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    anyhow::bail!("Device capture requires the cpal-audio feature")
                }
            }
        };
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(source)
    }
}
