// Demo host: feeds stdin lines through the moderation pipeline.
//
// Input lines:
//   steve: hello there          public chat
//   steve -> alex: psst         whisper
//   !quit steve                 player disconnects
//   !disable / !enable          operator chat switch

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::collections::HashMap;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};

use chatwarden::prelude::*;

const DATA_DIR_VAR: &str = "CHATWARDEN_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "chatwarden";

/// Prints player notices the way a server would show them in-game.
struct ConsoleNotifier;

#[async_trait]
impl PlayerNotifier for ConsoleNotifier {
    async fn notify(&self, player: &Player, message: &str) -> Result<()> {
        println!("[to {}] {}", player.name, message);
        Ok(())
    }
}

enum Line<'a> {
    Chat { sender: &'a str, message: &'a str },
    Whisper { sender: &'a str, target: &'a str, message: &'a str },
    Quit(&'a str),
    SetChatDisabled(bool),
}

fn parse_line(line: &str) -> Option<Line<'_>> {
    let line = line.trim_end();
    if let Some(command) = line.strip_prefix('!') {
        let mut parts = command.split_whitespace();
        return match (parts.next(), parts.next()) {
            (Some("quit"), Some(name)) => Some(Line::Quit(name)),
            (Some("disable"), None) => Some(Line::SetChatDisabled(true)),
            (Some("enable"), None) => Some(Line::SetChatDisabled(false)),
            _ => None,
        };
    }

    let (head, message) = line.split_once(": ")?;
    match head.split_once(" -> ") {
        Some((sender, target)) => Some(Line::Whisper {
            sender: sender.trim(),
            target: target.trim(),
            message,
        }),
        None => Some(Line::Chat {
            sender: head.trim(),
            message,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting Chatwarden v{}", chatwarden::VERSION);

    let data_dir = env::var(DATA_DIR_VAR).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let manager = ConfigurationManager::new(&data_dir);
    let config = match manager.initialize().await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to initialize configuration in {}: {}", data_dir, e);
            return Err(e);
        }
    };

    let pipeline = ModerationPipeline::builder(config)
        .data_dir(manager.data_dir())
        .handlers_dir(manager.handlers_dir())
        .notifier(ConsoleNotifier)
        .extension(CensorLogExtension)
        .start()
        .await?;

    let mut players: HashMap<String, Player> = HashMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Reading chat from stdin, format 'player: message'");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        };

        let Some(parsed) = parse_line(&line) else {
            warn!("Ignoring unrecognised line: {}", line);
            continue;
        };

        let (sender, event) = match parsed {
            Line::Quit(name) => {
                if players.remove(name).is_some() {
                    pipeline.on_player_quit(name).await;
                    println!("{} left the game", name);
                }
                continue;
            }
            Line::SetChatDisabled(disabled) => {
                pipeline.set_chat_disabled(disabled);
                continue;
            }
            Line::Chat { sender, message } => {
                let player = join(&pipeline, &mut players, sender).await;
                (sender, ChatEvent::public(ModerationInput::new(player, message)))
            }
            Line::Whisper { sender, target, message } => {
                let player = join(&pipeline, &mut players, sender).await;
                (sender, ChatEvent::whisper(player, target, message))
            }
        };

        let channel = event.channel.clone();
        let original = event.input.message.clone();
        match pipeline.on_chat(event).await {
            None => println!("{}", delivered_line(&channel, sender, &original)),
            Some(output) if output.fully_cancel_message => println!("(message from {} cancelled)", sender),
            Some(output) => println!("{}", delivered_line(&channel, sender, &output.finished_message)),
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn join(pipeline: &ModerationPipeline, players: &mut HashMap<String, Player>, name: &str) -> Player {
    if let Some(player) = players.get(name) {
        return player.clone();
    }
    pipeline.on_player_join(name).await;
    println!("{} joined the game", name);
    let player = Player::new(name);
    players.insert(name.to_string(), player.clone());
    player
}

/// How a delivered message shows up in the console.
fn delivered_line(channel: &ChatChannel, sender: &str, message: &str) -> String {
    match channel {
        ChatChannel::Public => format!("<{}> {}", sender, message),
        ChatChannel::Whisper { target } => format!("[{} -> {}] {}", sender, target, message),
    }
}
