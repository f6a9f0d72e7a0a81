use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::manager::LiveSessionManager;
use crate::config::{ConfigStore, Settings};
use crate::llm::provider_from_settings;

/// Whether the provider has to be rebuilt for `next`
fn provider_changed(previous: &Settings, next: &Settings) -> bool {
    previous.provider != next.provider
        || previous.api_key != next.api_key
        || previous.nats_url != next.nats_url
        || previous.base_url != next.base_url
}

/// Apply settings changes to the live session.
///
/// Live mode turned off stops the session. Any other change while the session
/// is active restarts it so the new settings take effect. An inactive session
/// is left alone. Provider settings changes rebuild the provider first.
/// The task ends when `cancel` fires or the store is dropped.
pub fn spawn_config_supervisor(
    manager: Arc<LiveSessionManager>,
    store: Arc<ConfigStore>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    let mut previous = changes.borrow_and_update().clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let next = changes.borrow_and_update().clone();
            if next == previous {
                continue;
            }
            let rebuild = provider_changed(&previous, &next);
            previous = next.clone();

            if rebuild {
                match provider_from_settings(&next).await {
                    Ok(provider) => manager.llm().replace(provider),
                    Err(e) => error!("Failed to rebuild LLM provider: {:#}", e),
                }
            }

            if !next.use_live_api {
                if manager.is_active() {
                    info!("Live mode disabled, stopping session");
                }
                manager.stop().await;
                continue;
            }

            if manager.is_active() {
                info!("Settings changed, restarting live session");
                manager.stop().await;
                if let Err(e) = manager.start().await {
                    error!("Failed to restart live session: {:#}", e);
                }
            }
        }

        info!("Config supervisor stopped");
    })
}
