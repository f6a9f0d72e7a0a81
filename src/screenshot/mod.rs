//! Screenshot collaborator used to fulfil the live model's screenshot tool.
//!
//! Providers return a `data:<mime>;base64,<payload>` URL; the dispatcher
//! strips the prefix and forwards raw image bytes to the session.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Settings;

const DEFAULT_MIME: &str = "image/jpeg";

/// Capture parameters taken from the settings snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOptions {
    pub quality: u8,
    pub sharpen: f64,
    pub grayscale: bool,
    pub no_compression: bool,
    /// `window` or `fullscreen`
    pub mode: String,
}

impl PreviewOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            quality: settings.compression_quality,
            sharpen: settings.sharpening,
            grayscale: settings.grayscale,
            no_compression: settings.no_compression,
            mode: settings.screenshot_mode.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait ScreenshotProvider: Send + Sync {
    /// Capture the screen and return it as a base64 data URL
    async fn capture_preview(&self, options: &PreviewOptions) -> Result<String>;
}

/// Split a data URL into `(mime type, base64 payload)`.
///
/// Strings without a `data:` prefix are treated as bare base64 JPEG.
pub fn parse_data_url(url: &str) -> (&str, &str) {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some(idx) = rest.find(";base64,") {
            if idx > 0 {
                return (&rest[..idx], &rest[idx + ";base64,".len()..]);
            }
        }
    }
    (DEFAULT_MIME, url)
}

/// Decode a data URL into `(mime type, image bytes)`.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let (mime, payload) = parse_data_url(url);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Invalid base64 image payload")?;
    Ok((mime.to_string(), bytes))
}

/// Serves an image file from disk as the "screenshot".
pub struct FileScreenshotProvider {
    path: PathBuf,
}

impl FileScreenshotProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn mime_type(&self) -> &'static str {
        match self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => DEFAULT_MIME,
        }
    }
}

#[async_trait::async_trait]
impl ScreenshotProvider for FileScreenshotProvider {
    async fn capture_preview(&self, options: &PreviewOptions) -> Result<String> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read screenshot {}", self.path.display()))?;
        if bytes.is_empty() {
            bail!("Screenshot file {} is empty", self.path.display());
        }

        info!(
            "Serving screenshot {} ({} bytes, mode={})",
            self.path.display(),
            bytes.len(),
            options.mode
        );

        Ok(format!(
            "data:{};base64,{}",
            self.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }
}

/// Used when no screenshot source is configured; every capture fails.
pub struct NoScreenshotProvider;

#[async_trait::async_trait]
impl ScreenshotProvider for NoScreenshotProvider {
    async fn capture_preview(&self, _options: &PreviewOptions) -> Result<String> {
        bail!("No screenshot source configured")
    }
}
