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

//! Reverse direction: the bridge is the network client and speaks stdio to
//! its own parent.
//!
//! Both reverse modes share the local stdio plumbing: parent stdin is framed
//! into JSON-RPC messages, and everything bound for the parent goes through a
//! single stdout writer task so lines never interleave.

pub mod sse;
pub mod streamable;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::error;

use crate::error::BridgeError;
use crate::framing::LineCodec;

/// One message per line to the parent, serialized through one task.
pub(crate) fn spawn_stdout_writer() -> mpsc::Sender<Value> {
    let (tx, mut rx) = mpsc::channel::<Value>(64);
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let mut line = match serde_json::to_vec(&msg) {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "Failed to serialize message for stdout");
                    continue;
                }
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });
    tx
}

/// Framed messages from the parent. The channel closes on stdin EOF.
pub(crate) fn spawn_stdin_reader() -> mpsc::Receiver<Value> {
    let (tx, rx) = mpsc::channel::<Value>(64);
    tokio::spawn(async move {
        let mut framed = FramedRead::new(tokio::io::stdin(), LineCodec::new());
        while let Some(item) = framed.next().await {
            match item {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "stdin read error");
                    break;
                }
            }
        }
    });
    rx
}

/// `--header` / `--oauth2Bearer` pairs as a reqwest header map.
pub(crate) fn build_header_map(
    headers: &[(String, String)],
) -> Result<reqwest::header::HeaderMap, BridgeError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name: reqwest::header::HeaderName = name
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid header name '{name}': {e}")))?;
        let value: reqwest::header::HeaderValue = value
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
