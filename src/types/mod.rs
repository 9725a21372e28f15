// src/types/mod.rs - Core data exchanged between the host, handlers and extensions

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A connected player as seen by the moderation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub unique_id: Uuid,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique_id: Uuid::new_v4(),
        }
    }
}

/// One chat message handed to the active handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationInput {
    pub message: String,
    pub player: Player,
    pub chat_format: String,
    pub recipients: Vec<Player>,
}

impl ModerationInput {
    pub fn new(player: Player, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            player,
            chat_format: String::new(),
            recipients: Vec::new(),
        }
    }
}

/// The decision for one message.
///
/// Unless `fully_cancel_message` is set, `finished_message` has the same token
/// layout as `original_message`, with redacted tokens replaced by filler of
/// identical length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationOutput {
    pub is_bad: bool,
    pub fully_cancel_message: bool,
    pub finished_message: String,
    pub original_message: String,
}

impl ModerationOutput {
    /// Deliver the message unchanged.
    pub fn pass(input: &ModerationInput) -> Self {
        Self {
            is_bad: false,
            fully_cancel_message: false,
            finished_message: input.message.clone(),
            original_message: input.message.clone(),
        }
    }

    /// Drop the message entirely, keeping the original text for observers.
    pub fn cancel(input: &ModerationInput) -> Self {
        Self {
            fully_cancel_message: true,
            ..Self::pass(input)
        }
    }
}

/// Which handler is serving messages.
///
/// `None` only exists while the pipeline is resolving its handler at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    None,
    Default,
    Custom,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerState::None => write!(f, "none"),
            HandlerState::Default => write!(f, "default"),
            HandlerState::Custom => write!(f, "custom"),
        }
    }
}

/// Detection strategies, in the order the engine applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Classifier,
    Fuzzy,
    ExactSubstring,
}

impl CheckKind {
    pub const ORDER: [CheckKind; 3] = [CheckKind::Classifier, CheckKind::Fuzzy, CheckKind::ExactSubstring];

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Classifier => "classifier",
            CheckKind::Fuzzy => "fuzzy_list",
            CheckKind::ExactSubstring => "exact_substring",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-strategy enable flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnabledChecks {
    pub classifier: bool,
    pub fuzzy: bool,
    pub exact: bool,
}

impl Default for EnabledChecks {
    fn default() -> Self {
        Self {
            classifier: true,
            fuzzy: true,
            exact: true,
        }
    }
}

impl EnabledChecks {
    pub fn none() -> Self {
        Self {
            classifier: false,
            fuzzy: false,
            exact: false,
        }
    }

    pub fn is_enabled(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Classifier => self.classifier,
            CheckKind::Fuzzy => self.fuzzy,
            CheckKind::ExactSubstring => self.exact,
        }
    }
}

/// Where a chat message was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatChannel {
    Public,
    Whisper { target: String },
}

/// A raw chat event as delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub input: ModerationInput,
    pub channel: ChatChannel,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl ChatEvent {
    pub fn public(input: ModerationInput) -> Self {
        Self {
            input,
            channel: ChatChannel::Public,
            received_at: chrono::Utc::now(),
        }
    }

    /// Private messages carry no chat format and a single implicit recipient.
    pub fn whisper(player: Player, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: ModerationInput::new(player, message),
            channel: ChatChannel::Whisper { target: target.into() },
            received_at: chrono::Utc::now(),
        }
    }
}
