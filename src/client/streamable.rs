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

//! Streamable-HTTP → stdio: POST every parent-stdin message to a remote MCP
//! endpoint, write the remote's answers to stdout.
//!
//! The remote assigns a session id on the first response (`Mcp-Session-Id`
//! header); it is echoed on every later request. Responses arrive either as
//! plain JSON bodies or as SSE-encoded bodies, and once a session exists a
//! long-lived GET stream carries server-initiated messages.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use url::Url;

use super::sse::SseDecoder;
use super::{build_header_map, spawn_stdin_reader, spawn_stdout_writer};
use crate::gateway::SESSION_ID_HEADER;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

pub async fn run(
    url: &str,
    protocol_version: &str,
    headers: &[(String, String)],
) -> Result<()> {
    let endpoint =
        Url::parse(url).with_context(|| format!("Invalid Streamable-HTTP URL '{url}'"))?;
    let header_map = build_header_map(headers)?;
    let client = reqwest::Client::new();

    info!(url = %endpoint, "Bridging stdio to remote Streamable-HTTP endpoint");
    let stdout_tx = spawn_stdout_writer();
    let mut stdin = spawn_stdin_reader();
    let mut session_id: Option<String> = None;
    let mut listener_started = false;

    while let Some(msg) = stdin.recv().await {
        let mut request = client
            .post(endpoint.clone())
            .headers(header_map.clone())
            .header(ACCEPT, ACCEPT_BOTH)
            .header("mcp-protocol-version", protocol_version)
            .json(&msg);
        if let Some(sid) = &session_id {
            request = request.header(SESSION_ID_HEADER, sid);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Failed to deliver message to remote");
                continue;
            }
        };

        if let Some(sid) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if session_id.as_deref() != Some(sid) {
                info!(session_id = %sid, "Remote assigned session");
                session_id = Some(sid.to_string());
            }
        }
        if let (Some(sid), false) = (&session_id, listener_started) {
            spawn_server_stream(
                client.clone(),
                endpoint.clone(),
                header_map.clone(),
                sid.clone(),
                stdout_tx.clone(),
            );
            listener_started = true;
        }

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            continue;
        }
        if !status.is_success() {
            error!(status = %status, "Remote rejected message");
            continue;
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            pump_sse_body(response, &stdout_tx).await;
        } else {
            match response.bytes().await {
                Ok(body) if body.is_empty() => {}
                Ok(body) => match serde_json::from_slice::<Value>(&body) {
                    Ok(reply) => {
                        if stdout_tx.send(reply).await.is_err() {
                            bail!("stdout closed");
                        }
                    }
                    Err(e) => error!(error = %e, "Remote answered with non-JSON body"),
                },
                Err(e) => error!(error = %e, "Failed to read remote response"),
            }
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}

/// Decode one SSE-encoded response body, forwarding every `message` frame.
async fn pump_sse_body(response: reqwest::Response, stdout_tx: &mpsc::Sender<Value>) {
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "SSE response body error");
                return;
            }
        };
        for frame in decoder.push(&String::from_utf8_lossy(&chunk)) {
            if frame.event != "message" {
                debug!(event = %frame.event, "Ignoring SSE frame in response body");
                continue;
            }
            match serde_json::from_str::<Value>(&frame.data) {
                Ok(msg) => {
                    if stdout_tx.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(e) => error!(error = %e, "Dropping non-JSON SSE frame"),
            }
        }
    }
}

/// Long-lived GET stream for server-initiated messages. Remotes without one
/// (stateless servers reject GET) are simply skipped.
fn spawn_server_stream(
    client: reqwest::Client,
    endpoint: Url,
    headers: reqwest::header::HeaderMap,
    session_id: String,
    stdout_tx: mpsc::Sender<Value>,
) {
    tokio::spawn(async move {
        let response = client
            .get(endpoint)
            .headers(headers)
            .header(ACCEPT, "text/event-stream")
            .header(SESSION_ID_HEADER, &session_id)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!("Server→client stream established");
                pump_sse_body(resp, &stdout_tx).await;
                debug!("Server→client stream ended");
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "Remote offers no server→client stream");
            }
            Err(e) => debug!(error = %e, "Could not open server→client stream"),
        }
    });
}
