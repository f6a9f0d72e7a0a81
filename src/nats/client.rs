use anyhow::{anyhow, bail, Context, Result};
use async_nats::{Client, Subscriber};
use base64::Engine;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{
    AudioFrameMessage, GenerateReply, GenerateRequest, OpenSessionReply, OpenSessionRequest,
    ServerMessage, ToolResponseMessage,
};
use crate::llm::{LiveConfig, LiveMessage, LiveProvider, LiveSession, LlmProvider, Message, SCREENSHOT_TOOL};

const OPEN_SUBJECT: &str = "live.session.open";
const GENERATE_SUBJECT: &str = "llm.generate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Live-capable provider relaying to a model gateway over NATS.
pub struct GatewayProvider {
    client: Client,
    api_key: String,
}

impl GatewayProvider {
    /// Connect to NATS server
    pub async fn connect(url: &str, api_key: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            api_key: api_key.to_string(),
        })
    }

    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<T> {
        let reply = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .with_context(|| format!("Request on {} timed out", subject))?
        .with_context(|| format!("Request on {} failed", subject))?;

        serde_json::from_slice(&reply.payload)
            .with_context(|| format!("Invalid reply on {}", subject))
    }
}

#[async_trait::async_trait]
impl LlmProvider for GatewayProvider {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn generate_content(&self, model: &str, messages: &[Message]) -> Result<Message> {
        let request = GenerateRequest {
            api_key: self.api_key.clone(),
            model: model.to_string(),
            messages: messages.to_vec(),
        };
        let reply: GenerateReply = self
            .request_json(GENERATE_SUBJECT, serde_json::to_vec(&request)?)
            .await?;

        if let Some(error) = reply.error {
            bail!("Gateway generation failed: {}", error);
        }
        let content = reply
            .content
            .ok_or_else(|| anyhow!("Gateway returned no content"))?;
        Ok(Message::assistant(content))
    }

    fn as_live(&self) -> Option<&dyn LiveProvider> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl LiveProvider for GatewayProvider {
    async fn connect_live(&self, config: &LiveConfig) -> Result<Arc<dyn LiveSession>> {
        let session_id = uuid::Uuid::new_v4().to_string();

        // Subscribe before opening so no early event is missed
        let events_subject = format!("live.{}.events", session_id);
        let events = self
            .client
            .subscribe(events_subject.clone())
            .await
            .context("Failed to subscribe to session events")?;

        let request = OpenSessionRequest {
            session_id: session_id.clone(),
            api_key: self.api_key.clone(),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            sampling: config.sampling.clone(),
            resume_token: config.resume_token.clone(),
            tools: vec![SCREENSHOT_TOOL.to_string()],
        };

        let reply: OpenSessionReply = self
            .request_json(OPEN_SUBJECT, serde_json::to_vec(&request)?)
            .await?;
        if let Some(error) = reply.error {
            bail!("Gateway refused live session: {}", error);
        }

        info!(
            "Live session {} opened (model={}, resumed={})",
            reply.session_id,
            config.model,
            config.resume_token.is_some()
        );

        Ok(Arc::new(NatsLiveSession {
            client: self.client.clone(),
            session_id: reply.session_id,
            events: Mutex::new(events),
            closed: CancellationToken::new(),
            resume_handle: std::sync::Mutex::new(None),
            sequence: AtomicU64::new(0),
        }))
    }
}

/// Live session bound to one gateway session id.
pub struct NatsLiveSession {
    client: Client,
    session_id: String,
    events: Mutex<Subscriber>,
    closed: CancellationToken,
    resume_handle: std::sync::Mutex<Option<String>>,
    sequence: AtomicU64,
}

impl NatsLiveSession {
    fn subject(&self, leaf: &str) -> String {
        format!("live.{}.{}", self.session_id, leaf)
    }

    async fn publish_json<T: serde::Serialize>(&self, leaf: &str, message: &T) -> Result<()> {
        if self.closed.is_cancelled() {
            bail!("Live session {} is closed", self.session_id);
        }
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(self.subject(leaf), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", self.subject(leaf)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LiveSession for NatsLiveSession {
    async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        if pcm.is_empty() {
            return Ok(());
        }
        let message = AudioFrameMessage {
            session_id: self.session_id.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            pcm: base64::engine::general_purpose::STANDARD.encode(pcm),
            sample_rate: 16000,
            channels: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        self.publish_json("audio", &message).await
    }

    async fn receive(&self) -> Result<Option<LiveMessage>> {
        let mut events = self.events.lock().await;
        let msg = tokio::select! {
            _ = self.closed.cancelled() => bail!("Live session {} is closed", self.session_id),
            msg = events.next() => msg,
        };

        let Some(msg) = msg else {
            bail!("Event stream for {} ended", self.session_id);
        };

        let server: ServerMessage = match serde_json::from_slice(&msg.payload) {
            Ok(server) => server,
            Err(e) => {
                warn!("Failed to parse server message: {}", e);
                return Ok(None);
            }
        };

        if let ServerMessage::Resumption { handle, resumable } = &server {
            debug!("Resumption update (resumable={})", resumable);
            let mut slot = self
                .resume_handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = if *resumable { handle.clone() } else { None };
        }

        Ok(server.into_live())
    }

    async fn send_tool_response(&self, id: &str, text: &str) -> Result<()> {
        self.publish_json(
            "tool",
            &ToolResponseMessage::Text {
                id: id.to_string(),
                content: text.to_string(),
            },
        )
        .await
    }

    async fn send_tool_response_with_image(
        &self,
        id: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<()> {
        info!(
            "Sending image tool response id={}, size={}, mime={}",
            id,
            image.len(),
            mime_type
        );
        self.publish_json(
            "tool",
            &ToolResponseMessage::Image {
                id: id.to_string(),
                mime_type: mime_type.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(image),
            },
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        info!("Closing live session {}", self.session_id);
        self.closed.cancel();
        // Best effort: the gateway also expires idle sessions
        if let Err(e) = self
            .client
            .publish(self.subject("close"), Vec::<u8>::new().into())
            .await
        {
            warn!("Failed to notify gateway of close: {}", e);
        }
        Ok(())
    }

    fn is_resumable(&self) -> bool {
        self.resume_token().is_some()
    }

    fn resume_token(&self) -> Option<String> {
        self.resume_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
