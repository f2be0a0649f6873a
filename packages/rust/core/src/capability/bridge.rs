//! Generation over a JSON-lines subprocess.
//!
//! The child prints `{"type":"ready"}` once, then answers every `generate`
//! request with a `result` or `error` line carrying the same id. A `shutdown`
//! request asks it to exit.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use scholarflow_shared::{BridgeConfig, Interaction, Result, ScholarflowError, expand_home};

use super::GenerationCapability;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ContextMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "generate")]
    Generate {
        id: String,
        instruction: &'a str,
        context: Vec<ContextMessage<'a>>,
        input: &'a str,
    },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result { id: String, text: String },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

fn bridge_err(msg: impl std::fmt::Display) -> ScholarflowError {
    ScholarflowError::Network(format!("bridge: {msg}"))
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

struct BridgeState {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    request_counter: u64,
}

impl BridgeState {
    async fn send(&mut self, request: &RequestMessage<'_>) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| bridge_err(format!("failed to serialize request: {e}")))?;
        self.stdin
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| bridge_err(format!("failed to write to stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| bridge_err(format!("failed to flush stdin: {e}")))
    }

    async fn receive(&mut self) -> Result<ResponseMessage> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| bridge_err(format!("read error: {e}")))?
            .ok_or_else(|| bridge_err("closed stdout unexpectedly"))?;

        serde_json::from_str(line.trim()).map_err(|e| {
            ScholarflowError::parse(format!(
                "invalid bridge message: {e} (got: {})",
                line.chars().take(200).collect::<String>()
            ))
        })
    }
}

/// A spawned bridge process. Requests are serialized through one pipe pair,
/// so concurrent callers queue on an async mutex.
pub struct BridgeCapability {
    state: Mutex<BridgeState>,
}

impl BridgeCapability {
    /// Spawn the bridge and wait for its ready message.
    #[instrument(skip_all, fields(cmd = %config.command, script = %config.script))]
    pub async fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!("spawning generation bridge");

        let mut command = Command::new(&config.command);
        command
            .arg(&config.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(expand_home(dir));
        }

        let mut child = command.spawn().map_err(|e| {
            bridge_err(format!(
                "failed to spawn: {e}. Is `{}` installed?",
                config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| bridge_err("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| bridge_err("failed to capture stdout"))?;

        let mut state = BridgeState {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            request_counter: 0,
        };

        match state.receive().await? {
            ResponseMessage::Ready => info!("bridge is ready"),
            other => {
                return Err(bridge_err(format!(
                    "expected ready message, got {other:?}"
                )));
            }
        }

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Send shutdown and wait for the process to exit.
    pub async fn shutdown(self) -> Result<()> {
        let mut state = self.state.into_inner();
        if let Err(e) = state.send(&RequestMessage::Shutdown).await {
            warn!(error = %e, "failed to send bridge shutdown");
        }
        match state.child.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationCapability for BridgeCapability {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn generate(
        &self,
        instruction: &str,
        context: &[Interaction],
        input: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        state.request_counter += 1;
        let id = format!("req-{}", state.request_counter);

        let request = RequestMessage::Generate {
            id: id.clone(),
            instruction,
            context: context
                .iter()
                .map(|i| ContextMessage {
                    role: i.role.as_str(),
                    content: &i.content,
                })
                .collect(),
            input,
        };
        state.send(&request).await?;

        match state.receive().await? {
            ResponseMessage::Result { id: resp_id, text } if resp_id == id => Ok(text),
            ResponseMessage::Result { id: resp_id, .. } => Err(bridge_err(format!(
                "response id '{resp_id}' does not match request '{id}'"
            ))),
            ResponseMessage::Error { error, .. } => Err(bridge_err(error)),
            ResponseMessage::Ready => Err(bridge_err("unexpected ready message during generation")),
        }
    }
}
