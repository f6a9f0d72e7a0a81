use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::backend::{CaptureSink, CaptureSource, CAPTURE_SAMPLE_RATE};

/// Size of each simulated hardware buffer
const REPLAY_BUFFER_MS: u64 = 10;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Unsupported WAV format: {} bit {:?} (expected 16 bit PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Convert to 16kHz mono: mix channels, then decimate.
    pub fn to_capture_format(&self) -> Result<Vec<i16>> {
        if self.sample_rate < CAPTURE_SAMPLE_RATE {
            bail!(
                "Cannot upsample {}Hz audio to {}Hz",
                self.sample_rate,
                CAPTURE_SAMPLE_RATE
            );
        }

        let mono = mix_to_mono(&self.samples, self.channels);
        Ok(decimate(&mono, self.sample_rate, CAPTURE_SAMPLE_RATE))
    }
}

/// Average interleaved channels into one.
fn mix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Downsample by taking every Nth sample
fn decimate(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let ratio = from_rate / to_rate;
    if ratio <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(ratio as usize).copied().collect()
}

/// Replays a WAV file into the capture sink at real-time pace.
pub struct WavFileCapture {
    name: String,
    samples: std::sync::Arc<Vec<i16>>,
    looping: bool,
    cancel: Option<CancellationToken>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WavFileCapture {
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let audio = AudioFile::open(path)?;
        let samples = audio.to_capture_format()?;
        Ok(Self::from_samples(audio.path, samples, looping))
    }

    /// Build a replay source from 16kHz mono samples already in memory.
    pub fn from_samples(name: impl Into<String>, samples: Vec<i16>, looping: bool) -> Self {
        Self {
            name: name.into(),
            samples: std::sync::Arc::new(samples),
            looping,
            cancel: None,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for WavFileCapture {
    async fn start(&mut self, sink: CaptureSink) -> Result<()> {
        if self.task.is_some() {
            bail!("Already capturing");
        }
        if self.samples.is_empty() {
            bail!("Audio file {} contains no samples", self.name);
        }

        let cancel = CancellationToken::new();
        let samples = std::sync::Arc::clone(&self.samples);
        let looping = self.looping;
        let token = cancel.clone();
        let chunk = (CAPTURE_SAMPLE_RATE as u64 * REPLAY_BUFFER_MS / 1000) as usize;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(REPLAY_BUFFER_MS));
            let mut offset = 0usize;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if offset >= samples.len() {
                    if !looping {
                        info!("Audio file replay finished");
                        break;
                    }
                    offset = 0;
                }

                let end = (offset + chunk).min(samples.len());
                sink.deliver_samples(&samples[offset..end]);
                offset = end;
            }
        });

        self.cancel = Some(cancel);
        self.task = Some(task);
        info!("Replaying {} ({} samples)", self.name, self.samples.len());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.await.context("Replay task panicked")?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
