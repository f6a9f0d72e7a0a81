use anyhow::{bail, Result};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use super::openai::OpenAiProvider;
use super::provider::LlmProvider;
use crate::config::Settings;
use crate::nats::GatewayProvider;

/// Holds the active provider; replaced as a whole when settings change.
pub struct LlmService {
    provider: RwLock<Arc<dyn LlmProvider>>,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: RwLock::new(provider),
        }
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, provider: Arc<dyn LlmProvider>) {
        info!("LLM provider set to {}", provider.name());
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = provider;
    }
}

/// Build the provider named by `settings.provider`.
pub async fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    match settings.provider.as_str() {
        "gateway" => {
            let provider = GatewayProvider::connect(&settings.nats_url, &settings.api_key).await?;
            Ok(Arc::new(provider))
        }
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            settings.api_key.clone(),
            settings.base_url.clone(),
        ))),
        other => bail!("Unknown provider: {}", other),
    }
}
