// Shared mock collaborators for the integration tests.
//
// MockBackend counts every transport it opens and closes so tests can check
// that nothing is left open.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use copilot_live::audio::{CaptureFactory, CaptureSource, WavFileCapture};
use copilot_live::config::{ConfigStore, Settings};
use copilot_live::events::{EventSink, LiveEvent, LiveStatus};
use copilot_live::llm::{
    LiveConfig, LiveMessage, LiveProvider, LiveSession, LlmProvider, LlmService, Message,
};
use copilot_live::screenshot::{PreviewOptions, ScreenshotProvider};
use copilot_live::session::{LiveSessionManager, SessionConfig};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct MockBackend {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub connect_attempts: AtomicUsize,
    /// Outcome of each connect attempt in order; empty means success
    pub connect_plan: Mutex<VecDeque<bool>>,
    /// Delay applied to every connect attempt after the first
    pub reconnect_latency: Mutex<Duration>,
    /// Failing sends for each new session in order; empty means none
    pub send_failure_plan: Mutex<VecDeque<usize>>,
    /// Resume token each new session advertises
    pub resume_tokens: Mutex<VecDeque<String>>,
    /// Resume token supplied with every connect attempt
    pub requested_tokens: Mutex<Vec<Option<String>>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn plan_connects(&self, plan: &[bool]) {
        self.connect_plan.lock().unwrap().extend(plan.iter().copied());
    }

    pub fn plan_send_failures(&self, plan: &[usize]) {
        self.send_failure_plan
            .lock()
            .unwrap()
            .extend(plan.iter().copied());
    }

    pub fn set_reconnect_latency(&self, latency: Duration) {
        *self.reconnect_latency.lock().unwrap() = latency;
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn latest(&self) -> Arc<MockSession> {
        Arc::clone(self.sessions.lock().unwrap().last().unwrap())
    }

    async fn connect(self: &Arc<Self>, config: &LiveConfig) -> Result<Arc<dyn LiveSession>> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested_tokens
            .lock()
            .unwrap()
            .push(config.resume_token.clone());

        let latency = *self.reconnect_latency.lock().unwrap();
        if attempt > 1 && !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let succeed = self.connect_plan.lock().unwrap().pop_front().unwrap_or(true);
        if !succeed {
            bail!("connection refused (attempt {})", attempt);
        }

        let failing_sends = self
            .send_failure_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(0);
        let resume_token = self.resume_tokens.lock().unwrap().pop_front();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let session = Arc::new(MockSession {
            backend: Arc::clone(self),
            failing_sends: AtomicUsize::new(failing_sends),
            sent: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            inbox_tx,
            inbox: tokio::sync::Mutex::new(inbox_rx),
            tool_texts: Mutex::new(Vec::new()),
            tool_images: Mutex::new(Vec::new()),
            resume_token,
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        // Counted last so a cancelled attempt never counts as opened
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }
}

pub struct MockSession {
    backend: Arc<MockBackend>,
    failing_sends: AtomicUsize,
    pub sent: AtomicUsize,
    closed: CancellationToken,
    inbox_tx: mpsc::UnboundedSender<std::result::Result<LiveMessage, String>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<std::result::Result<LiveMessage, String>>>,
    pub tool_texts: Mutex<Vec<(String, String)>>,
    pub tool_images: Mutex<Vec<(String, Vec<u8>, String)>>,
    resume_token: Option<String>,
}

impl MockSession {
    /// Queue a message for the receiver
    pub fn push(&self, message: LiveMessage) {
        let _ = self.inbox_tx.send(Ok(message));
    }

    /// Queue a receive error
    pub fn push_error(&self, error: &str) {
        let _ = self.inbox_tx.send(Err(error.to_string()));
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait::async_trait]
impl LiveSession for MockSession {
    async fn send_audio(&self, _pcm: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            bail!("session closed");
        }
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            bail!("send failed");
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<LiveMessage>> {
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(anyhow!("session closed")),
            next = inbox.recv() => match next {
                Some(Ok(message)) => Ok(Some(message)),
                Some(Err(error)) => Err(anyhow!(error)),
                None => Err(anyhow!("inbox closed")),
            },
        }
    }

    async fn send_tool_response(&self, id: &str, text: &str) -> Result<()> {
        self.tool_texts
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_tool_response_with_image(
        &self,
        id: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<()> {
        self.tool_images
            .lock()
            .unwrap()
            .push((id.to_string(), image.to_vec(), mime_type.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.backend.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_resumable(&self) -> bool {
        self.resume_token.is_some()
    }

    fn resume_token(&self) -> Option<String> {
        self.resume_token.clone()
    }
}

// ============================================================================
// Providers
// ============================================================================

pub struct MockProvider {
    pub backend: Arc<MockBackend>,
    live: bool,
    /// Reply to one-shot generation; `None` fails the call
    pub reply: Mutex<Option<String>>,
    pub reply_delay: Mutex<Duration>,
    pub prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn live(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self::build(backend, true))
    }

    pub fn request_only(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self::build(backend, false))
    }

    fn build(backend: Arc<MockBackend>, live: bool) -> Self {
        Self {
            backend,
            live,
            reply: Mutex::new(None),
            reply_delay: Mutex::new(Duration::ZERO),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Some(reply.to_string());
    }

    pub fn generate_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        if self.live {
            "mock-live"
        } else {
            "mock"
        }
    }

    async fn generate_content(&self, _model: &str, messages: &[Message]) -> Result<Message> {
        let prompt = messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);

        let delay = *self.reply_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.reply.lock().unwrap().clone();
        reply
            .map(Message::assistant)
            .ok_or_else(|| anyhow!("model unavailable"))
    }

    fn as_live(&self) -> Option<&dyn LiveProvider> {
        if self.live {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait::async_trait]
impl LiveProvider for MockProvider {
    async fn connect_live(&self, config: &LiveConfig) -> Result<Arc<dyn LiveSession>> {
        self.backend.connect(config).await
    }
}

// ============================================================================
// Capture, screenshots, events
// ============================================================================

pub enum CaptureMode {
    /// Loop one second of silence
    Silence,
    /// Fail inside the factory
    FailInit,
    /// Produce a source that fails to start
    FailStart,
}

pub struct MockCaptureFactory {
    mode: CaptureMode,
    pub created: AtomicUsize,
}

impl MockCaptureFactory {
    pub fn new(mode: CaptureMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl CaptureFactory for MockCaptureFactory {
    fn create(&self) -> Result<Box<dyn CaptureSource>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            CaptureMode::Silence => Ok(Box::new(WavFileCapture::from_samples(
                "silence",
                vec![0i16; 16000],
                true,
            ))),
            CaptureMode::FailInit => bail!("no input device"),
            // An empty replay source refuses to start
            CaptureMode::FailStart => Ok(Box::new(WavFileCapture::from_samples(
                "empty",
                Vec::new(),
                false,
            ))),
        }
    }
}

pub struct StaticScreenshot {
    url: Option<String>,
}

impl StaticScreenshot {
    pub fn ok(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Some(url.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { url: None })
    }
}

#[async_trait::async_trait]
impl ScreenshotProvider for StaticScreenshot {
    async fn capture_preview(&self, _options: &PreviewOptions) -> Result<String> {
        self.url
            .clone()
            .ok_or_else(|| anyhow!("screen capture permission denied"))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LiveEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LiveEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }

    pub fn statuses(&self) -> Vec<LiveStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: LiveEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn live_settings() -> Settings {
    Settings {
        api_key: "test-key".to_string(),
        use_live_api: true,
        ..Settings::default()
    }
}

/// Short delays so paused-clock tests stay small
pub fn fast_tuning() -> SessionConfig {
    SessionConfig {
        frame_ms: 10,
        reconnect_delay_ms: 20,
        reconnect_poll_ms: 5,
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub manager: Arc<LiveSessionManager>,
    pub backend: Arc<MockBackend>,
    pub provider: Arc<MockProvider>,
    pub capture: Arc<MockCaptureFactory>,
    pub events: Arc<RecordingSink>,
    pub store: Arc<ConfigStore>,
}

pub struct HarnessBuilder {
    settings: Settings,
    tuning: SessionConfig,
    live: bool,
    capture: CaptureMode,
    screenshots: Arc<dyn ScreenshotProvider>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: live_settings(),
            tuning: fast_tuning(),
            live: true,
            capture: CaptureMode::Silence,
            screenshots: StaticScreenshot::failing(),
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn request_only(mut self) -> Self {
        self.live = false;
        self
    }

    pub fn capture(mut self, mode: CaptureMode) -> Self {
        self.capture = mode;
        self
    }

    pub fn screenshots(mut self, screenshots: Arc<dyn ScreenshotProvider>) -> Self {
        self.screenshots = screenshots;
        self
    }

    pub fn build(self) -> Harness {
        let backend = MockBackend::new();
        let provider = if self.live {
            MockProvider::live(Arc::clone(&backend))
        } else {
            MockProvider::request_only(Arc::clone(&backend))
        };
        let store = Arc::new(ConfigStore::new(self.settings));
        let llm = Arc::new(LlmService::new(provider.clone()));
        let capture = MockCaptureFactory::new(self.capture);
        let events = RecordingSink::new();

        let manager = Arc::new(LiveSessionManager::new(
            Arc::clone(&store),
            llm,
            capture.clone(),
            self.screenshots,
            events.clone(),
            self.tuning,
        ));

        Harness {
            manager,
            backend,
            provider,
            capture,
            events,
            store,
        }
    }
}

/// Poll `condition` on the (usually paused) clock until it holds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Run `future` to completion, failing the test if it takes too long.
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(60), future)
        .await
        .unwrap_or_else(|_| panic!("{} did not finish", what))
}
