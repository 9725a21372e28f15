use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::time::Duration;

use super::players::PlayerStateStore;
use crate::config::ModerationConfig;
use crate::moderation::ModerationEngine;
use crate::types::{EnabledChecks, Player};

/// Host-side channel for notices aimed at a single player.
#[async_trait]
pub trait PlayerNotifier: Send + Sync {
    async fn notify(&self, player: &Player, message: &str) -> Result<()>;
}

/// Notifier for hosts without a player-facing channel.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl PlayerNotifier for LogNotifier {
    async fn notify(&self, player: &Player, message: &str) -> Result<()> {
        info!("[notice -> {}] {}", player.name, message);
        Ok(())
    }
}

/// Knobs the default handler reads on every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSettings {
    pub rate_limit: Duration,
    pub checks: EnabledChecks,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_millis(500),
            checks: EnabledChecks::default(),
        }
    }
}

impl From<&ModerationConfig> for HandlerSettings {
    fn from(config: &ModerationConfig) -> Self {
        Self {
            rate_limit: config.rate_limit(),
            checks: config.checks,
        }
    }
}

/// Shared dependencies handed to every handler and extension.
pub struct ModerationContext {
    pub players: PlayerStateStore,
    pub engine: ModerationEngine,
    pub settings: HandlerSettings,
    notifier: Box<dyn PlayerNotifier>,
}

impl ModerationContext {
    pub fn new(engine: ModerationEngine, notifier: Box<dyn PlayerNotifier>, settings: HandlerSettings) -> Self {
        Self {
            players: PlayerStateStore::new(),
            engine,
            settings,
            notifier,
        }
    }

    /// Send a notice; delivery failures are logged and otherwise ignored.
    pub async fn notify(&self, player: &Player, message: &str) {
        if let Err(e) = self.notifier.notify(player, message).await {
            warn!("Failed to notify {}: {}", player.name, e);
        }
    }
}
