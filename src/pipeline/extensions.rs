use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use log::{error, info};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::context::ModerationContext;
use super::events::{BusEvent, EventBus, Listener, CHAT_PROCESSED};
use crate::error::{panic_message, ModerationFault};

/// What an extension gets to work with while loading.
#[derive(Clone)]
pub struct ExtensionApi {
    pub events: Arc<EventBus>,
    pub context: Arc<ModerationContext>,
}

impl ExtensionApi {
    /// Shorthand for `events.on`.
    pub async fn on(&self, event_name: &str, listener: Listener) {
        self.events.on(event_name, listener).await;
    }
}

/// In-process add-on that observes the moderation lifecycle.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at startup; typically registers listeners.
    async fn on_load(&self, api: &ExtensionApi) -> Result<()>;
}

/// Load each extension in order. A failing one is logged and skipped.
///
/// Returns how many loaded cleanly.
pub async fn load_extensions(extensions: &[Box<dyn Extension>], api: &ExtensionApi) -> usize {
    let mut loaded = 0;
    for extension in extensions {
        let name = extension.name().to_string();
        info!("Loading extension: {}", name);

        let reason = match AssertUnwindSafe(extension.on_load(api)).catch_unwind().await {
            Ok(Ok(())) => {
                info!("Extension {} initialized via on_load()", name);
                loaded += 1;
                continue;
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!("{}", ModerationFault::listener(name, "on_load", reason));
    }
    loaded
}

/// Logs every message that came out of the pipeline censored.
#[derive(Debug, Default)]
pub struct CensorLogExtension;

#[async_trait]
impl Extension for CensorLogExtension {
    fn name(&self) -> &str {
        "censor_log"
    }

    async fn on_load(&self, api: &ExtensionApi) -> Result<()> {
        api.on(
            CHAT_PROCESSED,
            Listener::blocking("censor_log", |event, _ctx| {
                if let BusEvent::ChatProcessed { event, output, is_bad: true } = event {
                    info!(
                        "[censor_log] {} sent a censored message: {}",
                        event.input.player.name, output.finished_message
                    );
                }
                Ok(())
            }),
        )
        .await;
        Ok(())
    }
}
