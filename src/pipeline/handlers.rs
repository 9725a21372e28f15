// src/pipeline/handlers.rs - Handler contract, the default policy and the in-process catalog

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::context::ModerationContext;
use crate::error::{panic_message, ModerationFault};
use crate::types::{ModerationInput, ModerationOutput};

/// Bumped whenever the input/output shapes handlers see change.
pub const HANDLER_CONTRACT_VERSION: u32 = 1;

pub const RATE_LIMIT_NOTICE: &str = "You're sending messages too fast!";

/// The single decision function that turns a chat input into an output.
#[async_trait]
pub trait ChatHandler: Send + Sync {
    fn name(&self) -> &str;

    fn contract_version(&self) -> u32 {
        HANDLER_CONTRACT_VERSION
    }

    async fn handle(&self, input: &ModerationInput, ctx: &ModerationContext) -> Result<ModerationOutput>;
}

/// Built-in policy: rate-limit gate, then the full strategy chain.
#[derive(Debug, Default)]
pub struct DefaultHandler;

#[async_trait]
impl ChatHandler for DefaultHandler {
    fn name(&self) -> &str {
        "default"
    }

    async fn handle(&self, input: &ModerationInput, ctx: &ModerationContext) -> Result<ModerationOutput> {
        let name = &input.player.name;

        // Spamming keeps extending the cooldown.
        let limited = ctx
            .players
            .check_and_update(name, &input.message, ctx.settings.rate_limit)
            .await;

        let output = if limited {
            ctx.notify(&input.player, RATE_LIMIT_NOTICE).await;
            debug!("Rate limited message from {}", name);
            if rand::random_ratio(1, 3) {
                info!("{} is sending messages too fast: {}", name, input.message);
            }
            ModerationOutput::cancel(input)
        } else {
            let report = ctx.engine.check_and_censor(&input.message, &ctx.settings.checks).await;
            if report.is_bad {
                let caught: Vec<&str> = report.caught.iter().map(|kind| kind.name()).collect();
                info!(
                    "Censored message from {} [{}]: {}",
                    name,
                    caught.join(", "),
                    report.finished_message
                );
            }
            ModerationOutput {
                is_bad: report.is_bad,
                fully_cancel_message: false,
                finished_message: report.finished_message,
                original_message: input.message.clone(),
            }
        };

        Ok(output)
    }
}

/// Check that a handler's output belongs to the input it was given.
pub fn validate_output(input: &ModerationInput, output: &ModerationOutput) -> Result<(), String> {
    if output.original_message != input.message {
        return Err(format!(
            "original_message {:?} does not match input {:?}",
            output.original_message, input.message
        ));
    }
    Ok(())
}

pub type HandlerFactory = Arc<dyn Fn() -> Result<Arc<dyn ChatHandler>> + Send + Sync>;

/// Named in-process handlers selectable from config.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Arc<dyn ChatHandler>> + Send + Sync + 'static,
    {
        let id = id.into();
        debug!("Registered handler factory '{}'", id);
        self.factories.insert(id, Arc::new(factory));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Build the handler registered under `id`.
    ///
    /// Unknown ids, factory errors, factory panics and contract mismatches
    /// all come back as load faults.
    pub fn instantiate(&self, id: &str) -> Result<Arc<dyn ChatHandler>, ModerationFault> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ModerationFault::load(id, "no such handler"))?;

        let handler = match catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(handler)) => handler,
            Ok(Err(e)) => return Err(ModerationFault::load(id, e)),
            Err(payload) => return Err(ModerationFault::load(id, panic_message(payload.as_ref()))),
        };

        check_contract(id, handler.contract_version())?;
        Ok(handler)
    }
}

pub(crate) fn check_contract(id: &str, version: u32) -> Result<(), ModerationFault> {
    if version != HANDLER_CONTRACT_VERSION {
        return Err(ModerationFault::load(
            id,
            format!(
                "contract version {} does not match expected {}",
                version, HANDLER_CONTRACT_VERSION
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::testing::*;
    use crate::types::Player;
    use tokio::time::Duration;

    struct EchoHandler {
        version: u32,
    }

    #[async_trait]
    impl ChatHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        fn contract_version(&self) -> u32 {
            self.version
        }

        async fn handle(&self, input: &ModerationInput, _ctx: &ModerationContext) -> Result<ModerationOutput> {
            Ok(ModerationOutput::pass(input))
        }
    }

    #[tokio::test]
    async fn test_default_handler_censors() {
        let ctx = test_context(RecordingNotifier::default());
        let input = ModerationInput::new(Player::new("alex"), "this is a badword here");

        let output = DefaultHandler.handle(&input, &ctx).await.unwrap();
        assert!(output.is_bad);
        assert!(!output.fully_cancel_message);
        assert_eq!(output.finished_message, "this ## # ####### ####");
        assert_eq!(output.original_message, "this is a badword here");
        assert_eq!(ctx.players.get("alex").await.last_message, "this is a badword here");
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_handler_rate_limits() {
        let notifier = RecordingNotifier::default();
        let ctx = test_context(notifier.clone());
        let player = Player::new("alex");

        let first = DefaultHandler
            .handle(&ModerationInput::new(player.clone(), "hello"), &ctx)
            .await
            .unwrap();
        assert!(!first.fully_cancel_message);

        tokio::time::advance(Duration::from_millis(100)).await;
        let second = DefaultHandler
            .handle(&ModerationInput::new(player.clone(), "hello badword"), &ctx)
            .await
            .unwrap();
        assert!(second.fully_cancel_message);
        assert!(!second.is_bad);
        assert_eq!(second.original_message, "hello badword");
        assert_eq!(notifier.notices(), vec![("alex".to_string(), RATE_LIMIT_NOTICE.to_string())]);

        tokio::time::advance(Duration::from_millis(500)).await;
        let third = DefaultHandler
            .handle(&ModerationInput::new(player, "hello"), &ctx)
            .await
            .unwrap();
        assert!(!third.fully_cancel_message);
    }

    #[test]
    fn test_validate_output() {
        let input = ModerationInput::new(Player::new("alex"), "hello");
        assert!(validate_output(&input, &ModerationOutput::pass(&input)).is_ok());

        let mut forged = ModerationOutput::pass(&input);
        forged.original_message = "something else".to_string();
        assert!(validate_output(&input, &forged).is_err());
    }

    #[test]
    fn test_catalog_instantiate() {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register("echo", || Ok(Arc::new(EchoHandler { version: HANDLER_CONTRACT_VERSION }) as Arc<dyn ChatHandler>))
            .register("old", || Ok(Arc::new(EchoHandler { version: 0 }) as Arc<dyn ChatHandler>))
            .register("broken", || anyhow::bail!("missing entry point"))
            .register("panics", || panic!("boom"));

        assert_eq!(catalog.ids(), vec!["broken", "echo", "old", "panics"]);
        assert_eq!(catalog.instantiate("echo").unwrap().name(), "echo");

        for id in ["old", "broken", "panics", "missing"] {
            match catalog.instantiate(id) {
                Err(ModerationFault::Load { handler, .. }) => assert_eq!(handler, id),
                Err(other) => panic!("unexpected fault for {}: {}", id, other),
                Ok(_) => panic!("{} should not load", id),
            }
        }
    }
}
