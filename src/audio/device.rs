//! Input-device capture using CPAL.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! that builds it, plays it, and drops it when told to stop.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{error, info};

use super::backend::{CaptureSink, CaptureSource, CAPTURE_SAMPLE_RATE};

pub struct CpalCapture {
    device_name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"))?;
        let device_name = device.name().unwrap_or_else(|_| "default".to_string());

        info!("Input device selected: {}", device_name);

        Ok(Self {
            device_name,
            stop_tx: None,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl CaptureSource for CpalCapture {
    async fn start(&mut self, sink: CaptureSink) -> Result<()> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() sends or drops the sender
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn capture thread")?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .context("Capture start join failed")?
            .map_err(|_| anyhow!("Capture thread exited before starting"))?;

        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        info!("Capturing from {} at {}Hz mono", self.device_name, CAPTURE_SAMPLE_RATE);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Capture stop join failed")?
                .map_err(|_| anyhow!("Capture thread panicked"))?;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

fn build_stream(sink: CaptureSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No default input device"))?;

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                sink.deliver_samples(data);
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;
    Ok(stream)
}
