// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Child process supervision.
//!
//! Each stdio MCP server runs as a child spawned through the platform shell,
//! so compound command lines and quoting behave the way users typed them.
//! The supervisor exposes a line-oriented writer for stdin, a framed message
//! stream for stdout, drains stderr into the log, and reports process exit.

use std::process::Stdio;
use std::sync::Mutex;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tracing::{debug, error};

use crate::error::BridgeError;
use crate::framing::LineCodec;

/// Events produced by a supervised child.
#[derive(Debug)]
pub enum ChildEvent {
    /// One framed JSON-RPC message from the child's stdout.
    Message(Value),
    /// Process terminated. `code` is `None` when killed by a signal.
    Exit { code: Option<i32> },
}

/// Handle to a running stdio MCP server.
///
/// Writes are serialized through a single task, so concurrent senders can
/// never interleave bytes within a line.
pub struct ChildProcess {
    stdin_tx: mpsc::Sender<Value>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ChildProcess {
    /// Spawn `command` through the host shell with inherited environment.
    pub fn spawn(command: &str) -> Result<(Self, mpsc::Receiver<ChildEvent>), BridgeError> {
        debug!(command, "Spawning child process");

        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::Process(format!("Failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Process("Child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Process("Child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Process("Child stderr unavailable".to_string()))?;

        let (events_tx, events_rx) = mpsc::channel::<ChildEvent>(256);
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Value>(64);
        let (kill_tx, kill_rx) = oneshot::channel();

        // Writer: one JSON object per line, flushed per message.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let mut line = match serde_json::to_vec(&msg) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize message for child");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = stdin.write_all(&line).await {
                    error!(error = %e, "Failed to write to child stdin");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!(error = %e, "Failed to flush child stdin");
                    break;
                }
            }
        });

        // Framed stdout reader.
        let msg_tx = events_tx.clone();
        tokio::spawn(async move {
            let mut framed = FramedRead::new(stdout, LineCodec::new());
            while let Some(result) = framed.next().await {
                match result {
                    Ok(value) => {
                        if msg_tx.send(ChildEvent::Message(value)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Child stdout read error");
                        break;
                    }
                }
            }
        });

        // Stderr drain: the child's log lines become ours.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let msg = line.trim_end();
                        if !msg.is_empty() {
                            error!(stderr = %msg, "Child stderr");
                        }
                    }
                }
            }
        });

        // Exit watcher. An explicit kill reaps the process without emitting
        // an exit event; callers that kill already run their own teardown.
        tokio::spawn(async move {
            tokio::select! {
                _ = kill_rx => {
                    let _ = child.kill().await;
                }
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    let _ = events_tx.send(ChildEvent::Exit { code }).await;
                }
            }
        });

        Ok((
            Self {
                stdin_tx,
                kill_tx: Mutex::new(Some(kill_tx)),
            },
            events_rx,
        ))
    }

    /// Queue one message for the child's stdin.
    pub async fn send(&self, msg: Value) -> Result<(), BridgeError> {
        self.stdin_tx
            .send(msg)
            .await
            .map_err(|_| BridgeError::Process("Child stdin closed".to_string()))
    }

    pub fn kill(&self) {
        if let Some(tx) = self.kill_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
