// Integration tests for the live session manager
//
// All collaborators are mocks; time is paused so reconnect delays and the
// audio timers run instantly.

mod common;

use anyhow::Result;
use common::*;
use copilot_live::error::LiveError;
use copilot_live::events::LiveStatus;
use copilot_live::llm::LiveMessage;
use copilot_live::session::{spawn_config_supervisor, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Start / stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_and_stop() -> Result<()> {
    let h = HarnessBuilder::new().build();

    h.manager.start().await?;
    assert!(h.manager.is_active());
    assert_eq!(h.manager.state(), SessionState::Normal);
    assert_eq!(
        h.events.statuses(),
        vec![LiveStatus::Connecting, LiveStatus::Connected]
    );

    let session = h.backend.latest();
    wait_until("audio frames to reach the transport", || session.sent() >= 5).await;
    assert!(h.manager.stats().frames_sent >= 5);

    h.manager.stop().await;
    assert!(!h.manager.is_active());
    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert_eq!(h.backend.opened(), 1);
    assert_eq!(h.backend.closed(), 1);
    assert_eq!(h.events.statuses().last(), Some(&LiveStatus::Disconnected));

    // Second stop is a no-op
    h.manager.stop().await;
    assert_eq!(h.events.count("live:status"), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_while_active_is_noop() -> Result<()> {
    let h = HarnessBuilder::new().build();

    h.manager.start().await?;
    h.manager.start().await?;

    assert_eq!(h.backend.opened(), 1);
    assert_eq!(h.capture.created(), 1);

    h.manager.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() -> Result<()> {
    let h = HarnessBuilder::new().build();

    h.manager.start().await?;
    h.manager.stop().await;
    h.manager.start().await?;

    assert!(h.manager.is_active());
    assert_eq!(h.manager.state(), SessionState::Normal);
    assert_eq!(h.backend.opened(), 2);

    h.manager.stop().await;
    assert_eq!(h.backend.closed(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_credential() {
    let settings = copilot_live::Settings {
        api_key: String::new(),
        ..live_settings()
    };
    let h = HarnessBuilder::new().settings(settings).build();

    let err = h.manager.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LiveError>(),
        Some(LiveError::MissingCredential)
    ));
    assert_eq!(h.events.count("live:error"), 1);
    assert_eq!(h.backend.attempts(), 0);
    assert!(!h.manager.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_start_with_request_only_provider() {
    let h = HarnessBuilder::new().request_only().build();

    let err = h.manager.start().await.unwrap_err();
    match err.downcast_ref::<LiveError>() {
        Some(LiveError::LiveUnsupported { provider }) => assert_eq!(provider, "mock"),
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(h.events.names(), vec!["live:error"]);
    assert_eq!(h.backend.attempts(), 0);
    assert_eq!(h.capture.created(), 0);
    assert!(!h.manager.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_at_start() {
    let h = HarnessBuilder::new().build();
    h.backend.plan_connects(&[false]);

    assert!(h.manager.start().await.is_err());
    assert_eq!(h.capture.created(), 0);
    assert!(h.events.statuses().contains(&LiveStatus::Error));
    assert!(!h.manager.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_capture_init_failure_closes_transport() {
    let h = HarnessBuilder::new().capture(CaptureMode::FailInit).build();

    let err = h.manager.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LiveError>(),
        Some(LiveError::CaptureInit(_))
    ));
    assert_eq!(h.backend.opened(), 1);
    assert_eq!(h.backend.closed(), 1);
    assert!(!h.manager.is_active());
    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert!(h.events.errors()[0].contains("no input device"));
    assert_eq!(
        h.events.names(),
        vec!["live:status", "live:status", "live:error"]
    );
    assert_eq!(
        h.events.statuses(),
        vec![LiveStatus::Connecting, LiveStatus::Error]
    );
}

#[tokio::test(start_paused = true)]
async fn test_capture_start_failure_closes_transport() {
    let h = HarnessBuilder::new().capture(CaptureMode::FailStart).build();

    let err = h.manager.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LiveError>(),
        Some(LiveError::CaptureStart(_))
    ));
    assert_eq!(h.backend.opened(), 1);
    assert_eq!(h.backend.closed(), 1);
    assert!(!h.manager.is_active());
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_failures_trigger_reconnect() -> Result<()> {
    let h = HarnessBuilder::new().build();
    // Initial connect succeeds, first reconnect attempt fails, second succeeds
    h.backend.plan_connects(&[true, false, true]);
    h.backend.plan_send_failures(&[3, 0]);
    h.backend
        .resume_tokens
        .lock()
        .unwrap()
        .push_back("resume-1".to_string());

    h.manager.start().await?;

    wait_until("the reconnect to finish", || h.manager.stats().reconnects == 1).await;
    assert_eq!(h.manager.state(), SessionState::Normal);
    assert!(h.manager.is_active());
    assert_eq!(h.backend.attempts(), 3);
    assert_eq!(h.backend.opened(), 2);
    assert!(h.backend.session(0).is_closed());

    // Both reconnect attempts asked to resume the first session
    let tokens = h.backend.requested_tokens.lock().unwrap().clone();
    assert_eq!(
        tokens,
        vec![
            None,
            Some("resume-1".to_string()),
            Some("resume-1".to_string())
        ]
    );

    let replacement = h.backend.session(1);
    wait_until("frames on the new transport", || replacement.sent() >= 3).await;

    let statuses = h.events.statuses();
    assert_eq!(
        statuses,
        vec![
            LiveStatus::Connecting,
            LiveStatus::Connected,
            LiveStatus::Reconnecting,
            LiveStatus::Connected
        ]
    );
    assert_eq!(h.events.count("live:error"), 0);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_goaway_triggers_reconnect() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.manager.start().await?;

    h.backend.latest().push(LiveMessage::GoAway);

    wait_until("the reconnect to finish", || h.manager.stats().reconnects == 1).await;
    assert_eq!(h.backend.opened(), 2);
    assert!(h.backend.session(0).is_closed());
    assert_eq!(h.manager.state(), SessionState::Normal);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_receive_error_triggers_reconnect() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.manager.start().await?;

    h.backend.latest().push_error("connection reset");

    wait_until("the reconnect to finish", || h.manager.stats().reconnects == 1).await;
    assert!(h.manager.is_active());

    h.manager.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_is_single_flight() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.set_reconnect_latency(Duration::from_millis(200));
    h.manager.start().await?;

    let (a, b) = tokio::join!(h.manager.reconnect(), h.manager.reconnect());
    a?;
    b?;

    // One initial connect plus exactly one reconnect sequence
    assert_eq!(h.backend.attempts(), 2);
    assert_eq!(h.manager.stats().reconnects, 1);
    assert_eq!(h.events.count("live:status"), 4);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_is_terminal() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.plan_connects(&[true, false, false, false]);
    h.manager.start().await?;

    h.manager.reconnect().await?;

    wait_until("the error watcher", || h.events.count("live:error") == 1).await;
    assert_eq!(h.backend.attempts(), 4);
    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert!(!h.manager.is_active());
    assert!(h.events.errors()[0].contains("3 attempts"));
    assert_eq!(h.events.statuses().last(), Some(&LiveStatus::Error));
    wait_until("the transport to close", || h.backend.closed() == 1).await;

    h.manager.stop().await;
    assert_eq!(h.events.statuses().last(), Some(&LiveStatus::Disconnected));

    // A user restart works again
    h.manager.start().await?;
    assert!(h.manager.is_active());
    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_receiver_exhaustion_does_not_reconnect_again() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.plan_connects(&[true, false, false, false]);
    h.manager.start().await?;

    h.backend.latest().push(LiveMessage::GoAway);

    wait_until("the error watcher", || h.events.count("live:error") == 1).await;
    // Let any straggling task act on the dead transport
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.backend.attempts(), 4);
    assert_eq!(h.backend.opened(), 1);
    assert_eq!(
        h.events.statuses(),
        vec![
            LiveStatus::Connecting,
            LiveStatus::Connected,
            LiveStatus::Reconnecting,
            LiveStatus::Error
        ]
    );
    assert_eq!(h.manager.state(), SessionState::Stopped);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_exhaustion_does_not_reconnect_again() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.plan_connects(&[true, false, false, false]);
    h.backend.plan_send_failures(&[usize::MAX]);
    h.manager.start().await?;

    wait_until("the error watcher", || h.events.count("live:error") == 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.backend.attempts(), 4);
    assert_eq!(
        h.events
            .statuses()
            .iter()
            .filter(|s| **s == LiveStatus::Reconnecting)
            .count(),
        1
    );
    assert_eq!(h.events.count("live:error"), 1);
    assert_eq!(h.manager.state(), SessionState::Stopped);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_requested_reconnect() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.set_reconnect_latency(Duration::from_secs(5));
    h.manager.start().await?;

    let manager = Arc::clone(&h.manager);
    let reconnect = tokio::spawn(async move { manager.reconnect().await });
    wait_until("the reconnect attempt", || h.backend.attempts() == 2).await;

    within("stop", h.manager.stop()).await;
    tokio::task::yield_now().await;
    assert!(reconnect.is_finished(), "reconnect outlived stop");
    reconnect.await??;

    assert_eq!(h.backend.opened(), h.backend.closed());
    assert_eq!(h.events.statuses().last(), Some(&LiveStatus::Disconnected));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.set_reconnect_latency(Duration::from_secs(5));
    h.manager.start().await?;

    let manager = Arc::clone(&h.manager);
    let reconnect = tokio::spawn(async move { manager.reconnect().await });

    wait_until("the reconnect attempt", || h.backend.attempts() == 2).await;
    assert_eq!(h.manager.state(), SessionState::Reconnecting);

    within("stop", h.manager.stop()).await;
    reconnect.await??;

    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert!(!h.manager.is_active());
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_between_reconnect_attempts() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.plan_connects(&[true, false, false, false]);
    h.manager.start().await?;

    let manager = Arc::clone(&h.manager);
    let reconnect = tokio::spawn(async move { manager.reconnect().await });

    wait_until("a failed attempt", || h.backend.attempts() >= 2).await;
    h.manager.stop().await;
    reconnect.await??;

    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert_eq!(h.backend.opened(), h.backend.closed());
    assert_eq!(h.events.count("live:error"), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_mode_disabled_stops_on_send_failures() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.backend.plan_send_failures(&[usize::MAX]);
    h.manager.start().await?;

    h.store.modify(|s| s.use_live_api = false)?;

    wait_until("the sender to give up", || {
        h.manager.state() == SessionState::Stopped
    })
    .await;
    assert_eq!(h.backend.attempts(), 1);

    h.manager.stop().await;
    assert_eq!(h.backend.opened(), h.backend.closed());
    Ok(())
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_round_accumulation() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.manager.start().await?;
    let session = h.backend.latest();

    session.push(LiveMessage::Transcript("a".to_string()));
    session.push(LiveMessage::AiText("b".to_string()));
    session.push(LiveMessage::TurnDone);
    wait_until("the first turn", || h.events.count("live:done") == 1).await;
    assert_eq!(h.manager.graph().pending_rounds(), 1);

    // Interrupted discards the question, so the round has an empty side
    session.push(LiveMessage::Transcript("a".to_string()));
    session.push(LiveMessage::Interrupted(String::new()));
    session.push(LiveMessage::AiText("b".to_string()));
    session.push(LiveMessage::TurnDone);
    wait_until("the second turn", || h.events.count("live:done") == 2).await;
    assert_eq!(h.manager.graph().pending_rounds(), 1);
    assert_eq!(h.manager.current_round().question, "");
    assert_eq!(h.manager.current_round().answer, "");

    assert_eq!(h.events.count("live:transcript"), 2);
    assert_eq!(h.events.count("live:ai-text"), 2);
    assert_eq!(h.events.count("live:Interrupted"), 1);

    h.manager.stop().await;
    assert_eq!(h.manager.graph().pending_rounds(), 0);
    assert_eq!(h.events.count("graph:clear"), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_transcript_chunks_are_concatenated() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.manager.start().await?;
    let session = h.backend.latest();

    session.push(LiveMessage::Transcript("Tell me ".to_string()));
    session.push(LiveMessage::Transcript("about Rust".to_string()));
    session.push(LiveMessage::InterviewerDone);
    session.push(LiveMessage::AiText("Ownership".to_string()));
    wait_until("the answer", || h.events.count("live:ai-text") == 1).await;

    let round = h.manager.current_round();
    assert_eq!(round.question, "Tell me about Rust");
    assert_eq!(round.answer, "Ownership");
    assert_eq!(h.events.count("live:interviewer-done"), 1);

    h.manager.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_is_forwarded() -> Result<()> {
    let h = HarnessBuilder::new().build();
    h.manager.start().await?;

    h.backend
        .latest()
        .push(LiveMessage::Error("quota exceeded".to_string()));
    wait_until("the error event", || h.events.count("live:error") == 1).await;
    assert_eq!(h.events.errors(), vec!["quota exceeded".to_string()]);
    assert!(h.manager.is_active());

    h.manager.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_tool_sends_image() -> Result<()> {
    let h = HarnessBuilder::new()
        .screenshots(StaticScreenshot::ok("data:image/png;base64,AQID"))
        .build();
    h.manager.start().await?;
    let session = h.backend.latest();

    session.push(LiveMessage::ToolCall {
        name: "get_screenshot".to_string(),
        id: "call-1".to_string(),
    });
    wait_until("the tool response", || {
        !session.tool_images.lock().unwrap().is_empty()
    })
    .await;

    let images = session.tool_images.lock().unwrap().clone();
    assert_eq!(
        images,
        vec![("call-1".to_string(), vec![1, 2, 3], "image/png".to_string())]
    );
    assert!(session.tool_texts.lock().unwrap().is_empty());

    h.manager.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_failure_sends_text() -> Result<()> {
    let h = HarnessBuilder::new()
        .screenshots(StaticScreenshot::failing())
        .build();
    h.manager.start().await?;
    let session = h.backend.latest();

    // Unknown tools are ignored
    session.push(LiveMessage::ToolCall {
        name: "search_web".to_string(),
        id: "call-0".to_string(),
    });
    session.push(LiveMessage::ToolCall {
        name: "get_screenshot".to_string(),
        id: "call-1".to_string(),
    });
    wait_until("the tool response", || {
        !session.tool_texts.lock().unwrap().is_empty()
    })
    .await;

    let texts = session.tool_texts.lock().unwrap().clone();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, "call-1");
    assert!(texts[0].1.contains("permission denied"));
    assert!(session.tool_images.lock().unwrap().is_empty());

    h.manager.stop().await;
    Ok(())
}

// ============================================================================
// Config supervisor
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_supervisor_restarts_on_change_and_stops_when_disabled() -> Result<()> {
    let h = HarnessBuilder::new().build();
    let cancel = CancellationToken::new();
    let supervisor =
        spawn_config_supervisor(Arc::clone(&h.manager), Arc::clone(&h.store), cancel.clone());

    h.manager.start().await?;

    h.store.modify(|s| s.prompt = "Answer briefly.".to_string())?;
    wait_until("the restart", || h.backend.opened() == 2 && h.manager.is_active()).await;
    assert_eq!(h.backend.closed(), 1);

    h.store.modify(|s| s.use_live_api = false)?;
    wait_until("the stop", || !h.manager.is_active()).await;
    wait_until("the transport to close", || h.backend.closed() == 2).await;
    assert_eq!(h.manager.state(), SessionState::Stopped);

    cancel.cancel();
    supervisor.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_ignores_inactive_manager() -> Result<()> {
    let h = HarnessBuilder::new().build();
    let cancel = CancellationToken::new();
    let supervisor =
        spawn_config_supervisor(Arc::clone(&h.manager), Arc::clone(&h.store), cancel.clone());

    h.store.modify(|s| s.temperature = 0.3)?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.backend.attempts(), 0);
    assert!(!h.manager.is_active());

    cancel.cancel();
    supervisor.await?;
    Ok(())
}
