//! # Chatwarden
//!
//! A chat moderation pipeline for game servers: profanity detection and
//! censoring, per-player rate limiting, pluggable decision handlers and an
//! event bus for extensions.
//!
//! ## Features
//!
//! - **Layered detection**: classifier, fuzzy word list and substring long-list strategies
//! - **Length-preserving censoring**: redacted words keep their shape, neighbours included
//! - **Rate limiting**: cancels messages sent faster than the configured interval
//! - **Custom handlers**: in-process catalog or a subprocess speaking JSON lines
//! - **Fault isolation**: a broken handler, listener or strategy never takes chat down
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatwarden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConfigurationManager::new("chatwarden");
//!     let config = manager.initialize().await?;
//!
//!     let pipeline = ModerationPipeline::builder(config)
//!         .data_dir(manager.data_dir())
//!         .handlers_dir(manager.handlers_dir())
//!         .extension(CensorLogExtension)
//!         .start()
//!         .await?;
//!
//!     let steve = Player::new("steve");
//!     pipeline.on_player_join(&steve.name).await;
//!
//!     let event = ChatEvent::public(ModerationInput::new(steve, "hello there"));
//!     if let Some(output) = pipeline.on_chat(event).await {
//!         if !output.fully_cancel_message {
//!             println!("{}", output.finished_message);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod moderation;
pub mod pipeline;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::config::{ConfigurationManager, ModerationConfig};
    pub use crate::error::ModerationFault;
    pub use crate::moderation::classifier::{Classifier, LexiconClassifier};
    pub use crate::moderation::wordlists::WordLists;
    pub use crate::moderation::{CensorReport, ModerationEngine};
    pub use crate::pipeline::{
        BusEvent, CensorLogExtension, ChatHandler, EventBus, Extension, ExtensionApi, HandlerCatalog, Listener,
        ModerationContext, ModerationPipeline, PipelineBuilder, PlayerNotifier, CHAT_PROCESSED, CHAT_RECEIVED,
    };
    pub use crate::types::{
        ChatChannel, ChatEvent, CheckKind, EnabledChecks, HandlerState, ModerationInput, ModerationOutput, Player,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
