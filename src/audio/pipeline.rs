//! Capture-to-queue audio pipeline.
//!
//! A capture source writes raw PCM into a [`RingBuffer`] from its own
//! callback. A timer-driven packetizer drains exactly one frame per tick into
//! a bounded queue; when the queue is full the frame is dropped so the timer
//! never stalls. Delivery is in order and at most once.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureSink, CaptureSource};
use super::ring_buffer::RingBuffer;
use crate::error::LiveError;

/// One fixed-size packet of PCM bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Packetizer sequence number, counting dropped frames too
    pub sequence: u64,
    /// Raw little-endian 16-bit PCM
    pub pcm: Vec<u8>,
}

/// Frame geometry and buffering limits
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Packetizer tick and frame duration
    pub frame_duration: Duration,
    /// Bytes per frame (sample rate × bytes per sample × duration)
    pub frame_bytes: usize,
    /// Bounded queue capacity in frames
    pub queue_capacity: usize,
    /// Ring buffer capacity in bytes
    pub ring_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // 16kHz × 2 bytes × 30ms
        let frame_bytes = 16000 * 2 * 30 / 1000;
        Self {
            frame_duration: Duration::from_millis(30),
            frame_bytes,
            queue_capacity: 100,
            ring_capacity: frame_bytes * 200, // ~6 seconds
        }
    }
}

/// Counters observed by the packetizer and capture sink
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub bytes_captured: AtomicU64,
    pub frames_queued: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub ticks_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub bytes_captured: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub ticks_skipped: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer end of the bounded frame queue.
///
/// Cloneable so the pipeline can drain what the consumer left behind.
#[derive(Clone)]
pub struct FrameQueue {
    rx: Arc<Mutex<mpsc::Receiver<AudioFrame>>>,
}

impl FrameQueue {
    /// Wait for the next frame; `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<AudioFrame> {
        self.rx.lock().await.recv().await
    }

    pub async fn close_and_drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

/// Running capture source + packetizer pair.
pub struct AudioPipeline {
    ring: Arc<RingBuffer>,
    stats: Arc<PipelineStats>,
    queue: FrameQueue,
    source: Option<Box<dyn CaptureSource>>,
    cancel: CancellationToken,
    packetizer: Option<JoinHandle<()>>,
}

impl AudioPipeline {
    /// Start `source` and the packetizer.
    ///
    /// On a capture start failure nothing is left running.
    pub async fn start(config: PipelineConfig, mut source: Box<dyn CaptureSource>) -> Result<Self> {
        let ring = Arc::new(RingBuffer::new(config.ring_capacity));
        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        info!(
            "Starting audio pipeline: source={}, frame={}ms/{} bytes, queue={}",
            source.name(),
            config.frame_duration.as_millis(),
            config.frame_bytes,
            config.queue_capacity
        );

        source
            .start(CaptureSink::new(Arc::clone(&ring), Arc::clone(&stats)))
            .await
            .map_err(|e| LiveError::CaptureStart(format!("{:#}", e)))
            .context("Failed to start audio capture")?;

        let cancel = CancellationToken::new();
        let packetizer = tokio::spawn(run_packetizer(
            config,
            Arc::clone(&ring),
            Arc::clone(&stats),
            tx,
            cancel.clone(),
        ));

        Ok(Self {
            ring,
            stats,
            queue: FrameQueue {
                rx: Arc::new(Mutex::new(rx)),
            },
            source: Some(source),
            cancel,
            packetizer: Some(packetizer),
        })
    }

    pub fn frames(&self) -> FrameQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.ring.len()
    }

    /// Stop the source and timer, reset the ring, discard queued frames and
    /// close the queue. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.stop().await {
                error!("Failed to stop capture source {}: {}", source.name(), e);
            }
        }

        self.cancel.cancel();
        if let Some(task) = self.packetizer.take() {
            if let Err(e) = task.await {
                error!("Packetizer task panicked: {}", e);
            }
        }

        self.ring.reset();
        let discarded = self.queue.close_and_drain().await;
        info!("Audio pipeline stopped ({} queued frames discarded)", discarded);
    }
}

async fn run_packetizer(
    config: PipelineConfig,
    ring: Arc<RingBuffer>,
    stats: Arc<PipelineStats>,
    tx: mpsc::Sender<AudioFrame>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut packet = vec![0u8; config.frame_bytes];
    let mut sequence = 0u64;

    debug!("Packetizer started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match ring.read(&mut packet) {
            Ok(_) => {}
            Err(LiveError::InsufficientData { .. }) => {
                stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                warn!("Ring buffer read failed: {}", e);
                continue;
            }
        }

        let frame = AudioFrame {
            sequence,
            pcm: packet.clone(),
        };
        sequence += 1;

        match tx.try_send(frame) {
            Ok(()) => {
                stats.frames_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let dropped = stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Audio queue full, dropped frame {} ({} dropped so far)",
                    frame.sequence, dropped
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Audio queue closed");
                break;
            }
        }
    }

    debug!("Packetizer stopped");
}
