use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::dispatch::{ConversationRound, MessageDispatcher};
use super::state::{AtomicSessionState, SessionSlot, SessionState};
use super::stats::SessionStats;
use crate::audio::{AudioPipeline, CaptureFactory, FrameQueue, PipelineStats};
use crate::config::ConfigStore;
use crate::error::LiveError;
use crate::events::{EventSink, LiveEvent, LiveStatus};
use crate::graph::{ConversationGraph, GraphNode};
use crate::llm::{supports_live, LiveConfig, LiveMessage, LiveSession, LlmService};
use crate::screenshot::ScreenshotProvider;

/// Collaborators shared by every run of the manager
struct Shared {
    config: Arc<ConfigStore>,
    llm: Arc<LlmService>,
    capture: Arc<dyn CaptureFactory>,
    events: Arc<dyn EventSink>,
    graph: Arc<ConversationGraph>,
    dispatcher: MessageDispatcher,
    tuning: SessionConfig,
}

impl Shared {
    fn live_enabled(&self) -> bool {
        self.config.get().use_live_api
    }

    /// Open a transport with the current settings.
    async fn connect(&self, resume_token: Option<String>) -> Result<Arc<dyn LiveSession>> {
        let settings = self.config.get();
        let provider = self.llm.provider();
        let live = provider.as_live().ok_or_else(|| LiveError::LiveUnsupported {
            provider: provider.name().to_string(),
        })?;

        let mut live_config = LiveConfig::from_settings(&settings);
        live_config.resume_token = resume_token;
        live.connect_live(&live_config).await
    }
}

/// State of one started session, from `start()` to `stop()`
struct LiveRun {
    shared: Arc<Shared>,
    state: AtomicSessionState,
    slot: SessionSlot,
    cancel: CancellationToken,
    tasks: TaskTracker,
    reconnect_gate: Mutex<()>,
    failures: mpsc::Sender<LiveError>,
    pipeline: Mutex<Option<AudioPipeline>>,
    audio_stats: Arc<PipelineStats>,
    started_at: DateTime<Utc>,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    reconnects: AtomicU64,
}

impl LiveRun {
    fn is_active(&self) -> bool {
        self.slot.is_some() && !self.state.is_stopped()
    }

    /// Whether `session` is still the installed transport
    fn is_current(&self, session: &Arc<dyn LiveSession>) -> bool {
        self.slot
            .load()
            .is_some_and(|current| {
                Arc::as_ptr(&current) as *const () == Arc::as_ptr(session) as *const ()
            })
    }

    /// Enter `Stopped` and wake every task
    fn halt(&self) {
        self.state.stop();
        self.cancel.cancel();
    }

    /// Stop capture and close the transport.
    async fn teardown(&self) {
        let pipeline = self.pipeline.lock().await.take();
        if let Some(mut pipeline) = pipeline {
            pipeline.shutdown().await;
        }
        self.close_transport().await;
    }

    async fn close_transport(&self) {
        if let Some(session) = self.slot.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close live session: {:#}", e);
            }
        }
    }

    /// Wait until every task of this run has exited
    async fn join(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Sleep for `duration`; false if the run was cancelled meanwhile
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Replace the transport. At most one reconnect runs at a time; a
    /// concurrent call returns immediately.
    async fn reconnect(&self) {
        let Ok(_gate) = self.reconnect_gate.try_lock() else {
            debug!("Reconnect already in progress");
            return;
        };

        if !self.state.transition(SessionState::Reconnecting) {
            debug!("Session stopped, not reconnecting");
            return;
        }
        self.shared
            .events
            .emit(LiveEvent::Status(LiveStatus::Reconnecting));

        let mut resume_token = None;
        if let Some(old) = self.slot.load() {
            if old.is_resumable() {
                resume_token = old.resume_token();
            }
            if let Err(e) = old.close().await {
                debug!("Closing old session failed: {:#}", e);
            }
        }
        info!(
            "Reconnecting live session (resume={})",
            resume_token.is_some()
        );

        match self.connect_with_retry(resume_token).await {
            Ok(session) => {
                if self.cancel.is_cancelled() || self.state.is_stopped() {
                    info!("Session stopped during reconnect, discarding new transport");
                    if let Err(e) = session.close().await {
                        warn!("Failed to close discarded session: {:#}", e);
                    }
                    return;
                }

                self.slot.replace(session);
                if self.cancel.is_cancelled() {
                    // stop() may have closed the slot before the new transport landed
                    info!("Session stopped during reconnect, discarding new transport");
                    self.close_transport().await;
                    return;
                }
                self.state
                    .compare_set(SessionState::Reconnecting, SessionState::Normal);
                let total = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
                info!("Live session reconnected ({} reconnects so far)", total);
                self.shared
                    .events
                    .emit(LiveEvent::Status(LiveStatus::Connected));
            }
            Err(LiveError::ReconnectAborted) => {
                info!("Reconnect aborted");
            }
            Err(e) => {
                // The old transport is closed; with the slot empty the sender and
                // receiver idle until the error watcher ends the run
                self.slot.take();
                self.state
                    .compare_set(SessionState::Reconnecting, SessionState::Normal);
                error!("{}", e);
                if self.failures.try_send(e).is_err() {
                    debug!("Failure already reported");
                }
            }
        }
    }

    async fn connect_with_retry(
        &self,
        resume_token: Option<String>,
    ) -> std::result::Result<Arc<dyn LiveSession>, LiveError> {
        let attempts = self.shared.tuning.reconnect_attempts.max(1);
        let delay = self.shared.tuning.reconnect_delay();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(LiveError::ReconnectAborted);
            }
            if !self.shared.live_enabled() {
                info!("Live mode disabled, stopping session");
                self.halt();
                return Err(LiveError::ReconnectAborted);
            }

            info!("Reconnect attempt {}/{}", attempt, attempts);
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(LiveError::ReconnectAborted),
                result = self.shared.connect(resume_token.clone()) => result,
            };

            match result {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {:#}", attempt, e);
                    reason = format!("{:#}", e);
                }
            }

            if attempt < attempts && !self.pause(delay).await {
                return Err(LiveError::ReconnectAborted);
            }
        }

        Err(LiveError::ReconnectExhausted { attempts, reason })
    }
}

/// Forward queued frames to the current transport.
async fn run_sender(run: Arc<LiveRun>, frames: FrameQueue) {
    let threshold = run.shared.tuning.send_failure_threshold.max(1);
    let poll = run.shared.tuning.reconnect_poll();
    let mut consecutive_failures = 0u32;

    info!("Audio sender started");

    'frames: loop {
        let frame = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        loop {
            match run.state.load() {
                SessionState::Normal => break,
                SessionState::Stopped => break 'frames,
                SessionState::Reconnecting => {
                    consecutive_failures = 0;
                    if !run.pause(poll).await {
                        break 'frames;
                    }
                }
            }
        }

        let Some(session) = run.slot.load() else {
            continue;
        };

        match session.send_audio(&frame.pcm).await {
            Ok(()) => {
                consecutive_failures = 0;
                run.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                consecutive_failures += 1;
                run.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Audio send failed ({}/{}): {:#}",
                    consecutive_failures, threshold, e
                );

                if consecutive_failures >= threshold {
                    consecutive_failures = 0;
                    if !run.shared.live_enabled() {
                        info!("Live mode disabled, stopping session");
                        run.halt();
                        break;
                    }
                    warn!("{} consecutive send failures, reconnecting", threshold);
                    let reconnecting = Arc::clone(&run);
                    run.tasks
                        .spawn(async move { reconnecting.reconnect().await });
                }
            }
        }
    }

    info!("Audio sender stopped");
}

/// Read messages from the current transport and dispatch them in order.
async fn run_receiver(run: Arc<LiveRun>) {
    let poll = run.shared.tuning.reconnect_poll();

    info!("Live receiver started");

    loop {
        let Some(session) = run.slot.load() else {
            if !run.pause(poll).await {
                break;
            }
            continue;
        };

        let received = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => break,
            received = session.receive() => received,
        };

        match received {
            Ok(Some(LiveMessage::GoAway)) => info!("Backend sent GoAway"),
            Ok(Some(message)) => {
                run.shared
                    .dispatcher
                    .dispatch(session.as_ref(), message)
                    .await;
                continue;
            }
            Ok(None) => continue,
            Err(e) => debug!("Receive failed: {:#}", e),
        }

        match run.state.load() {
            SessionState::Stopped => break,
            SessionState::Reconnecting => {
                // Old transport closing under us
                if !run.pause(poll).await {
                    break;
                }
                continue;
            }
            SessionState::Normal => {}
        }

        if !run.is_current(&session) {
            // Replaced by a reconnect while we were waiting on it
            continue;
        }

        if !run.shared.live_enabled() {
            info!("Live mode disabled, stopping session");
            run.halt();
            break;
        }

        run.reconnect().await;
    }

    info!("Live receiver stopped");
}

/// Turn a reported reconnect failure into a terminal error.
async fn run_error_watcher(run: Arc<LiveRun>, mut failures: mpsc::Receiver<LiveError>) {
    tokio::select! {
        _ = run.cancel.cancelled() => {}
        Some(failure) = failures.recv() => {
            error!("Live session failed: {}", failure);
            run.halt();
            run.teardown().await;
            run.shared.events.emit(LiveEvent::Status(LiveStatus::Error));
            run.shared.events.emit(LiveEvent::Error(failure.to_string()));
        }
    }
}

/// Owns the live session lifecycle: connect, audio sender, receiver,
/// reconnection and shutdown.
pub struct LiveSessionManager {
    shared: Arc<Shared>,
    current: RwLock<Option<Arc<LiveRun>>>,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
}

impl LiveSessionManager {
    pub fn new(
        config: Arc<ConfigStore>,
        llm: Arc<LlmService>,
        capture: Arc<dyn CaptureFactory>,
        screenshots: Arc<dyn ScreenshotProvider>,
        events: Arc<dyn EventSink>,
        tuning: SessionConfig,
    ) -> Self {
        let graph = ConversationGraph::new(
            Arc::clone(&config),
            Arc::clone(&llm),
            Arc::clone(&events),
            tuning.graph_trigger_round,
            tuning.summarize_timeout(),
        );
        let dispatcher = MessageDispatcher::new(
            Arc::clone(&graph),
            Arc::clone(&events),
            screenshots,
            Arc::clone(&config),
        );

        Self {
            shared: Arc::new(Shared {
                config,
                llm,
                capture,
                events,
                graph,
                dispatcher,
                tuning,
            }),
            current: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    fn current_run(&self) -> Option<Arc<LiveRun>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_run(&self) -> Option<Arc<LiveRun>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.shared.config
    }

    pub fn llm(&self) -> &Arc<LlmService> {
        &self.shared.llm
    }

    /// Open the transport, start capture and the session tasks.
    ///
    /// Configuration errors are reported as `live:error` and returned without
    /// starting anything. A failure after the transport opened closes it again.
    /// Calling `start` on an active manager does nothing.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(run) = self.current_run() {
            if run.is_active() {
                debug!("Live session already active");
                return Ok(());
            }
            // Ended on its own; make sure nothing of it is left
            self.take_run();
            run.halt();
            run.teardown().await;
            run.join().await;
        }

        let settings = self.shared.config.get();
        if settings.api_key.trim().is_empty() {
            return Err(self.refuse(LiveError::MissingCredential));
        }

        let provider = self.shared.llm.provider();
        if !supports_live(provider.as_ref()) {
            return Err(self.refuse(LiveError::LiveUnsupported {
                provider: provider.name().to_string(),
            }));
        }

        info!("Starting live session (model={})", settings.model);
        self.shared
            .events
            .emit(LiveEvent::Status(LiveStatus::Connecting));

        let session = match self.shared.connect(None).await {
            Ok(session) => session,
            Err(e) => {
                self.shared
                    .events
                    .emit(LiveEvent::Status(LiveStatus::Error));
                self.shared.events.emit(LiveEvent::Error(format!("{:#}", e)));
                return Err(e.context("Failed to open live session"));
            }
        };

        let source = match self.shared.capture.create() {
            Ok(source) => source,
            Err(e) => {
                let err = anyhow::Error::from(LiveError::CaptureInit(format!("{:#}", e)));
                return Err(self.abort_start(session, err).await);
            }
        };

        let pipeline = match AudioPipeline::start(self.shared.tuning.pipeline_config(), source).await
        {
            Ok(pipeline) => pipeline,
            Err(e) => return Err(self.abort_start(session, e).await),
        };

        let (failures_tx, failures_rx) = mpsc::channel(2);
        let frames = pipeline.frames();
        let run = Arc::new(LiveRun {
            shared: Arc::clone(&self.shared),
            state: AtomicSessionState::new(SessionState::Normal),
            slot: SessionSlot::new(session),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            reconnect_gate: Mutex::new(()),
            failures: failures_tx,
            audio_stats: pipeline.stats(),
            pipeline: Mutex::new(Some(pipeline)),
            started_at: Utc::now(),
            frames_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        });

        run.tasks.spawn(run_sender(Arc::clone(&run), frames));
        run.tasks.spawn(run_receiver(Arc::clone(&run)));
        run.tasks
            .spawn(run_error_watcher(Arc::clone(&run), failures_rx));

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(run);

        info!("Live session started");
        self.shared
            .events
            .emit(LiveEvent::Status(LiveStatus::Connected));
        Ok(())
    }

    fn refuse(&self, error: LiveError) -> anyhow::Error {
        warn!("Live session not started: {}", error);
        self.shared.events.emit(LiveEvent::Error(error.to_string()));
        error.into()
    }

    async fn abort_start(&self, session: Arc<dyn LiveSession>, error: anyhow::Error) -> anyhow::Error {
        error!("Live session start failed: {:#}", error);
        if let Err(e) = session.close().await {
            warn!("Failed to close live session: {:#}", e);
        }
        self.shared
            .events
            .emit(LiveEvent::Status(LiveStatus::Error));
        self.shared.events.emit(LiveEvent::Error(format!("{:#}", error)));
        error
    }

    /// Stop the session and wait for every task to exit. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(run) = self.take_run() else {
            debug!("No live session to stop");
            return;
        };

        info!("Stopping live session");
        run.halt();
        run.teardown().await;
        run.join().await;
        // A reconnect may have installed a transport after teardown
        run.close_transport().await;

        self.shared.dispatcher.reset();
        self.shared.graph.clear();
        self.shared.graph.wait_idle().await;

        info!(
            "Live session stopped (frames sent={}, reconnects={})",
            run.frames_sent.load(Ordering::Relaxed),
            run.reconnects.load(Ordering::Relaxed)
        );
        self.shared
            .events
            .emit(LiveEvent::Status(LiveStatus::Disconnected));
    }

    /// Trigger the reconnection procedure on the running session.
    pub async fn reconnect(&self) -> Result<()> {
        let run = self
            .current_run()
            .filter(|run| run.is_active())
            .ok_or(LiveError::SessionNotActive)
            .context("Cannot reconnect")?;

        // Tracked so stop() waits for it
        let reconnecting = Arc::clone(&run);
        run.tasks
            .spawn(async move { reconnecting.reconnect().await })
            .await
            .context("Reconnect task panicked")?;
        Ok(())
    }

    /// True iff a transport is held and the session is not stopped
    pub fn is_active(&self) -> bool {
        self.current_run().is_some_and(|run| run.is_active())
    }

    pub fn state(&self) -> SessionState {
        self.current_run()
            .map(|run| run.state.load())
            .unwrap_or(SessionState::Stopped)
    }

    pub fn stats(&self) -> SessionStats {
        let nodes = self.shared.graph.node_count();
        match self.current_run() {
            Some(run) => SessionStats {
                state: run.state.load(),
                active: run.is_active(),
                started_at: Some(run.started_at),
                frames_sent: run.frames_sent.load(Ordering::Relaxed),
                send_failures: run.send_failures.load(Ordering::Relaxed),
                reconnects: run.reconnects.load(Ordering::Relaxed),
                nodes,
                audio: Some(run.audio_stats.snapshot()),
            },
            None => SessionStats {
                state: SessionState::Stopped,
                active: false,
                started_at: None,
                frames_sent: 0,
                send_failures: 0,
                reconnects: 0,
                nodes,
                audio: None,
            },
        }
    }

    pub fn graph_nodes(&self) -> Vec<GraphNode> {
        self.shared.graph.nodes()
    }

    pub fn graph(&self) -> &Arc<ConversationGraph> {
        &self.shared.graph
    }

    /// Accumulators of the turn in progress
    pub fn current_round(&self) -> ConversationRound {
        self.shared.dispatcher.current_round()
    }
}
