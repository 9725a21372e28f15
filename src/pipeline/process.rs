// src/pipeline/process.rs - Custom handlers running as child processes
//
// Protocol: newline-delimited JSON over the child's stdin/stdout.
//   host  -> {"contract_version":1}
//   child -> {"contract_version":1}
// then, per message:
//   host  -> {"input":{...},"player_state":{...}}
//   child -> {"is_bad":..,"fully_cancel_message":..,"finished_message":..,"original_message":..}
// Anything the child writes to stderr goes to the host's stderr.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use super::context::ModerationContext;
use super::handlers::{check_contract, ChatHandler, HANDLER_CONTRACT_VERSION};
use super::players::PlayerSnapshot;
use crate::error::ModerationFault;
use crate::types::{ModerationInput, ModerationOutput};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    contract_version: u32,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    input: &'a ModerationInput,
    player_state: PlayerSnapshot,
}

struct ProcessIo {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    /// A request was written but its answer never read, because the caller
    /// gave up on it. The stale answer is drained before the next request.
    awaiting_reply: bool,
}

impl ProcessIo {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        match self.stdout.next_line().await? {
            Some(line) => Ok(line),
            None => {
                let status = self.child.try_wait().ok().flatten();
                Err(anyhow!("handler process closed its output (exit status: {:?})", status))
            }
        }
    }
}

/// A handler executable speaking the JSON lines protocol.
///
/// Requests are serialized through one lock so replies pair up with requests.
pub struct ProcessHandler {
    id: String,
    io: Mutex<ProcessIo>,
}

impl ProcessHandler {
    /// Spawn `program` and complete the version handshake.
    pub async fn spawn(id: &str, program: &Path) -> Result<Self, ModerationFault> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModerationFault::load(id, format!("failed to spawn {}: {}", program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ModerationFault::load(id, "child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModerationFault::load(id, "child stdout unavailable"))?;

        let mut io = ProcessIo {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            awaiting_reply: false,
        };

        let version = match timeout(HANDSHAKE_TIMEOUT, handshake(&mut io)).await {
            Ok(Ok(version)) => version,
            Ok(Err(e)) => return Err(ModerationFault::load(id, format!("handshake failed: {:#}", e))),
            Err(_) => return Err(ModerationFault::load(id, "handshake timed out")),
        };
        check_contract(id, version)?;

        info!("Started handler process '{}' ({})", id, program.display());
        Ok(Self {
            id: id.to_string(),
            io: Mutex::new(io),
        })
    }
}

async fn handshake(io: &mut ProcessIo) -> Result<u32> {
    let hello = serde_json::to_string(&Hello {
        contract_version: HANDLER_CONTRACT_VERSION,
    })?;
    io.send_line(&hello).await?;
    let reply = io.read_line().await?;
    let hello: Hello = serde_json::from_str(&reply).with_context(|| format!("bad hello: {}", reply))?;
    Ok(hello.contract_version)
}

#[async_trait]
impl ChatHandler for ProcessHandler {
    fn name(&self) -> &str {
        &self.id
    }

    async fn handle(&self, input: &ModerationInput, ctx: &ModerationContext) -> Result<ModerationOutput> {
        let request = Request {
            input,
            player_state: ctx.players.get(&input.player.name).await.snapshot(),
        };
        let line = serde_json::to_string(&request)?;

        let mut io = self.io.lock().await;
        if io.awaiting_reply {
            let stale = io.read_line().await?;
            warn!("Discarded late reply from handler '{}': {}", self.id, stale);
            io.awaiting_reply = false;
        }

        io.awaiting_reply = true;
        io.send_line(&line).await?;
        let reply = io.read_line().await?;
        io.awaiting_reply = false;
        drop(io);

        debug!("Handler '{}' replied: {}", self.id, reply);
        let output: ModerationOutput =
            serde_json::from_str(&reply).with_context(|| format!("malformed output: {}", reply))?;
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::context::testing::*;
    use crate::types::Player;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const UPPERCASE_HANDLER: &str = r#"read hello
echo '{"contract_version":1}'
while read line; do
  echo '{"is_bad":true,"fully_cancel_message":false,"finished_message":"HELLO","original_message":"hello"}'
done
"#;

    #[tokio::test]
    async fn test_process_handler_round_trip() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "upper", UPPERCASE_HANDLER);
        let handler = ProcessHandler::spawn("upper", &script).await.unwrap();
        let ctx = test_context(RecordingNotifier::default());

        for _ in 0..2 {
            let input = ModerationInput::new(Player::new("alex"), "hello");
            let output = handler.handle(&input, &ctx).await.unwrap();
            assert!(output.is_bad);
            assert_eq!(output.finished_message, "HELLO");
        }
        assert_eq!(handler.name(), "upper");
    }

    #[tokio::test]
    async fn test_version_mismatch_is_load_fault() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "future", "read hello\necho '{\"contract_version\":99}'\n");
        match ProcessHandler::spawn("future", &script).await {
            Err(ModerationFault::Load { reason, .. }) => assert!(reason.contains("99")),
            Err(other) => panic!("unexpected fault: {}", other),
            Ok(_) => panic!("handler should not load"),
        }
    }

    #[tokio::test]
    async fn test_silent_exit_is_load_fault() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "quitter", "exit 0\n");
        assert!(matches!(
            ProcessHandler::spawn("quitter", &script).await,
            Err(ModerationFault::Load { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_reply_is_error() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "garbage",
            "read hello\necho '{\"contract_version\":1}'\nwhile read line; do echo 'not json'; done\n",
        );
        let handler = ProcessHandler::spawn("garbage", &script).await.unwrap();
        let ctx = test_context(RecordingNotifier::default());
        let input = ModerationInput::new(Player::new("alex"), "hello");
        assert!(handler.handle(&input, &ctx).await.is_err());
    }
}
