use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;
use tracing::info;

use crate::error::LiveError;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Config {
    /// Load from `path` (any format the `config` crate knows), then apply
    /// `LIVE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LIVE").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.settings.validate()?;
        Ok(cfg)
    }
}

/// User-facing settings snapshot consumed by the live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: String,
    /// `gateway` (live-capable) or `openai`
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub nats_url: String,
    /// User system prompt, appended to the built-in live instruction
    pub prompt: String,

    // Sampling
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,

    /// Model used to summarize rounds into graph nodes; empty disables the model call
    pub assistant_model: String,

    pub use_live_api: bool,

    // Screenshot tool
    pub screenshot_mode: String,
    pub compression_quality: u8,
    pub sharpening: f64,
    pub grayscale: bool,
    pub no_compression: bool,
}

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            provider: "gateway".to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: String::new(),
            nats_url: "nats://localhost:4222".to_string(),
            prompt: String::new(),
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_tokens: 8192,
            assistant_model: String::new(),
            use_live_api: false,
            screenshot_mode: "window".to_string(),
            compression_quality: 80,
            sharpening: 0.0,
            grayscale: false,
            no_compression: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> std::result::Result<(), LiveError> {
        if !self.screenshot_mode.is_empty()
            && self.screenshot_mode != "window"
            && self.screenshot_mode != "fullscreen"
        {
            return Err(LiveError::InvalidConfig {
                field: "screenshot_mode".to_string(),
                message: "must be 'fullscreen' or 'window'".to_string(),
            });
        }
        if !(1..=100).contains(&self.compression_quality) {
            return Err(LiveError::InvalidConfig {
                field: "compression_quality".to_string(),
                message: "must be between 1 and 100".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared settings with change notification.
///
/// Readers take a snapshot with [`ConfigStore::get`]; subscribers receive every
/// accepted update through a watch channel.
pub struct ConfigStore {
    current: RwLock<Settings>,
    changes: watch::Sender<Settings>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> Self {
        let (changes, _) = watch::channel(settings.clone());
        Self {
            current: RwLock::new(settings),
            changes,
        }
    }

    pub fn get(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and install new settings, notifying subscribers.
    pub fn update(&self, settings: Settings) -> std::result::Result<(), LiveError> {
        settings.validate()?;
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *current = settings.clone();
        }
        self.changes.send_replace(settings);
        info!("Settings updated");
        Ok(())
    }

    /// Apply a mutation to a copy of the current settings and install it.
    pub fn modify(
        &self,
        f: impl FnOnce(&mut Settings),
    ) -> std::result::Result<(), LiveError> {
        let mut next = self.get();
        f(&mut next);
        self.update(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.changes.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
