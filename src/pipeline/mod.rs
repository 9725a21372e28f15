// src/pipeline/mod.rs - Chat moderation pipeline: handler resolution, fault isolation, host events

use anyhow::Result;
use futures_util::FutureExt;
use log::{error, info, warn};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::timeout;

use crate::config::ModerationConfig;
use crate::error::{panic_message, ModerationFault};
use crate::moderation::classifier::LexiconClassifier;
use crate::moderation::wordlists::WordLists;
use crate::moderation::ModerationEngine;
use crate::types::{ChatEvent, HandlerState, ModerationInput, ModerationOutput};

pub mod context;
pub mod events;
pub mod extensions;
pub mod handlers;
pub mod players;
pub mod process;

pub use context::{HandlerSettings, LogNotifier, ModerationContext, PlayerNotifier};
pub use events::{BusEvent, EventBus, Listener, ListenerKind, CHAT_PROCESSED, CHAT_RECEIVED};
pub use extensions::{load_extensions, CensorLogExtension, Extension, ExtensionApi};
pub use handlers::{ChatHandler, DefaultHandler, HandlerCatalog, HANDLER_CONTRACT_VERSION};
pub use players::{PlayerSnapshot, PlayerState, PlayerStateStore};
pub use process::ProcessHandler;

pub const CHAT_DISABLED_NOTICE: &str = "Chat is temporarily disabled for technical reasons";

enum ActiveHandler {
    Default,
    Custom(Arc<dyn ChatHandler>),
}

/// Collects the pipeline's collaborators, then resolves the handler once.
pub struct PipelineBuilder {
    config: ModerationConfig,
    data_dir: PathBuf,
    handlers_dir: Option<PathBuf>,
    catalog: HandlerCatalog,
    notifier: Box<dyn PlayerNotifier>,
    engine: Option<ModerationEngine>,
    extensions: Vec<Box<dyn Extension>>,
}

impl PipelineBuilder {
    pub fn new(config: ModerationConfig) -> Self {
        Self {
            config,
            data_dir: PathBuf::from("."),
            handlers_dir: None,
            catalog: HandlerCatalog::new(),
            notifier: Box::new(LogNotifier),
            engine: None,
            extensions: Vec::new(),
        }
    }

    /// Base for relative word list paths in the config. Defaults to the
    /// working directory.
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Directory searched for handler executables.
    pub fn handlers_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.handlers_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn catalog(mut self, catalog: HandlerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn notifier(mut self, notifier: impl PlayerNotifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Use this engine instead of building one from the configured word lists.
    pub fn engine(mut self, engine: ModerationEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Resolve the handler, load extensions and return a serving pipeline.
    ///
    /// Only building the engine can fail here; handler and extension problems
    /// are logged and degrade to the default behaviour.
    pub async fn start(self) -> Result<ModerationPipeline> {
        let engine = match self.engine {
            Some(engine) => engine,
            None => {
                let lists = WordLists::load(&self.config.word_lists, &self.data_dir).await?;
                ModerationEngine::new(Arc::new(lists), Arc::new(LexiconClassifier::builtin()?))
            }
        }
        .with_replacement(self.config.replacement_char)
        .with_classifier_tuning(self.config.classifier_window, self.config.classifier_threshold);

        let context = Arc::new(ModerationContext::new(
            engine,
            self.notifier,
            HandlerSettings::from(&self.config),
        ));

        let active = resolve_handler(&self.config, &self.catalog, self.handlers_dir.as_deref()).await;

        let events = Arc::new(EventBus::new());
        let api = ExtensionApi {
            events: Arc::clone(&events),
            context: Arc::clone(&context),
        };
        let loaded = load_extensions(&self.extensions, &api).await;
        info!("Loaded {}/{} extensions", loaded, self.extensions.len());

        if !self.config.use_message_handling {
            info!("Automatic message handling is disabled, chat will pass through untouched");
        }

        let pipeline = ModerationPipeline {
            context,
            events,
            active,
            fallback: DefaultHandler,
            config: self.config,
            chat_disabled: AtomicBool::new(false),
        };
        info!("Moderation pipeline started with {} handler", pipeline.handler_state());
        Ok(pipeline)
    }
}

async fn resolve_handler(config: &ModerationConfig, catalog: &HandlerCatalog, handlers_dir: Option<&Path>) -> ActiveHandler {
    let Some(id) = config.handler_id() else {
        info!("No handler specified in config, using the default handler");
        return ActiveHandler::Default;
    };

    info!("Loading handler from config: {}", id);
    match load_custom_handler(id, catalog, handlers_dir).await {
        Ok(handler) => {
            info!("Custom handler '{}' will now override the default handler", id);
            ActiveHandler::Custom(handler)
        }
        Err(fault) => {
            warn!("{}, falling back to the default handler", fault);
            ActiveHandler::Default
        }
    }
}

async fn load_custom_handler(
    id: &str,
    catalog: &HandlerCatalog,
    handlers_dir: Option<&Path>,
) -> Result<Arc<dyn ChatHandler>, ModerationFault> {
    if catalog.contains(id) {
        return catalog.instantiate(id);
    }

    let program = handlers_dir
        .map(|dir| dir.join(id))
        .filter(|path| path.is_file())
        .ok_or_else(|| {
            ModerationFault::load(
                id,
                format!("not found in handlers directory or catalog [{}]", catalog.ids().join(", ")),
            )
        })?;

    let handler = ProcessHandler::spawn(id, &program).await?;
    Ok(Arc::new(handler))
}

/// The serving pipeline. One instance per host.
pub struct ModerationPipeline {
    context: Arc<ModerationContext>,
    events: Arc<EventBus>,
    active: ActiveHandler,
    fallback: DefaultHandler,
    config: ModerationConfig,
    chat_disabled: AtomicBool,
}

impl ModerationPipeline {
    pub fn builder(config: ModerationConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Never `HandlerState::None` once the pipeline exists.
    pub fn handler_state(&self) -> HandlerState {
        match self.active {
            ActiveHandler::Default => HandlerState::Default,
            ActiveHandler::Custom(_) => HandlerState::Custom,
        }
    }

    pub fn context(&self) -> &Arc<ModerationContext> {
        &self.context
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Decide on one message. Always returns a valid output.
    ///
    /// A custom handler that errors, panics, times out or returns an output
    /// for some other message is logged, and the message is reprocessed by
    /// the default handler. Player state the failed call touched is rolled
    /// back first, so the sender is judged as if it never ran.
    pub async fn handle(&self, input: &ModerationInput) -> ModerationOutput {
        if let ActiveHandler::Custom(handler) = &self.active {
            let before = self.context.players.get(&input.player.name).await;
            match self.call_custom(handler.as_ref(), input).await {
                Ok(output) => return output,
                Err(fault) => {
                    error!("{}, reprocessing with the default handler", fault);
                    self.context.players.restore(before).await;
                }
            }
        }
        self.call_default(input).await
    }

    async fn call_custom(&self, handler: &dyn ChatHandler, input: &ModerationInput) -> Result<ModerationOutput, ModerationFault> {
        let name = handler.name().to_string();
        let call = AssertUnwindSafe(handler.handle(input, &self.context)).catch_unwind();

        let outcome = match self.config.handler_timeout() {
            Some(limit) => timeout(limit, call)
                .await
                .map_err(|_| ModerationFault::handler(&name, format!("timed out after {:?}", limit)))?,
            None => call.await,
        };

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ModerationFault::handler(&name, format!("{:#}", e))),
            Err(payload) => return Err(ModerationFault::handler(&name, panic_message(payload.as_ref()))),
        };

        handlers::validate_output(input, &output).map_err(|reason| ModerationFault::handler(&name, reason))?;
        Ok(output)
    }

    async fn call_default(&self, input: &ModerationInput) -> ModerationOutput {
        let reason = match AssertUnwindSafe(self.fallback.handle(input, &self.context))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => return output,
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!(
            "{}, delivering message unmodified",
            ModerationFault::handler(self.fallback.name(), reason)
        );
        ModerationOutput::pass(input)
    }

    /// Host entry point for a chat or whisper event.
    ///
    /// `None` means message handling is off and the host should deliver the
    /// event as it is.
    pub async fn on_chat(&self, event: ChatEvent) -> Option<ModerationOutput> {
        if !self.config.use_message_handling {
            return None;
        }

        if self.is_chat_disabled() {
            self.context.notify(&event.input.player, CHAT_DISABLED_NOTICE).await;
            return Some(ModerationOutput::cancel(&event.input));
        }

        self.events
            .emit(&BusEvent::ChatReceived { event: event.clone() }, &self.context)
            .await;

        let output = self.handle(&event.input).await;

        let is_bad = output.is_bad;
        self.events
            .emit(
                &BusEvent::ChatProcessed {
                    event,
                    output: output.clone(),
                    is_bad,
                },
                &self.context,
            )
            .await;

        Some(output)
    }

    pub async fn on_player_join(&self, name: &str) {
        self.context.players.reset(name).await;
    }

    pub async fn on_player_quit(&self, name: &str) {
        self.context.players.remove(name).await;
    }

    /// Operator switch that cancels all chat while set.
    pub fn set_chat_disabled(&self, disabled: bool) {
        self.chat_disabled.store(disabled, Ordering::SeqCst);
        if disabled {
            warn!("Chat has been disabled");
        } else {
            info!("Chat has been re-enabled");
        }
    }

    pub fn is_chat_disabled(&self) -> bool {
        self.chat_disabled.load(Ordering::SeqCst)
    }
}
