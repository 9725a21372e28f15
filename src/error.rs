//! Fault taxonomy for the moderation pipeline.
//!
//! None of these ever reach a player: each is logged and recovered where it
//! happens, and the worst case is a message falling through to the default
//! handler.

use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModerationFault {
    /// A configured handler could not be resolved, loaded or verified.
    #[error("handler '{handler}' failed to load: {reason}")]
    Load { handler: String, reason: String },

    /// The active handler raised, panicked, timed out or returned a malformed output.
    #[error("handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },

    /// An event-bus listener or extension hook failed.
    #[error("listener '{listener}' failed on '{event}': {reason}")]
    Listener {
        listener: String,
        event: String,
        reason: String,
    },

    /// A detection strategy could not produce a verdict.
    #[error("strategy '{strategy}' failed: {reason}")]
    Strategy { strategy: &'static str, reason: String },
}

impl ModerationFault {
    pub fn load(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handler(handler: impl Into<String>, reason: impl ToString) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    pub fn listener(listener: impl Into<String>, event: impl Into<String>, reason: impl ToString) -> Self {
        Self::Listener {
            listener: listener.into(),
            event: event.into(),
            reason: reason.to_string(),
        }
    }

    pub fn strategy(strategy: &'static str, reason: impl ToString) -> Self {
        Self::Strategy {
            strategy,
            reason: reason.to_string(),
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
