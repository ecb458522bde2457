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

//! SSE → stdio: subscribe to a remote SSE MCP endpoint, expose it on local
//! stdio.
//!
//! The remote's first `endpoint` event names the POST URL (possibly
//! relative); every parent-stdin message is POSTed there, and every remote
//! `message` event becomes one line on stdout. Custom headers ride on both
//! the subscription and the POSTs.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use super::{build_header_map, spawn_stdin_reader, spawn_stdout_writer};

/// One decoded SSE frame. Frames without an explicit `event:` field are
/// `message` frames.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Frames are blank-line delimited;
/// `data:` lines of one frame are joined with `\n`; comment lines start with
/// `:`. Partial frames stay buffered until their terminator arrives.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        while let Some((end, sep)) = frame_boundary(&self.buf) {
            let raw: String = self.buf.drain(..end + sep).collect();
            if let Some(frame) = parse_frame(&raw[..end]) {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Byte offset of the first blank-line separator and its length.
fn frame_boundary(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n").map(|i| (i, 2));
    let crlf = buf.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in raw.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() && event.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: if event.is_empty() {
            "message".to_string()
        } else {
            event
        },
        data: data_lines.join("\n"),
    })
}

pub async fn run(url: &str, headers: &[(String, String)]) -> Result<()> {
    let base = Url::parse(url).with_context(|| format!("Invalid SSE URL '{url}'"))?;
    let header_map = build_header_map(headers)?;
    let client = reqwest::Client::new();

    info!(url = %base, "Connecting to remote SSE endpoint");
    let response = client
        .get(base.clone())
        .headers(header_map.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .context("SSE connect failed")?;
    if !response.status().is_success() {
        bail!("SSE connect failed with status {}", response.status());
    }

    let stdout_tx = spawn_stdout_writer();
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    let mut endpoint: Option<Url> = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("SSE stream error")?;
        for frame in decoder.push(&String::from_utf8_lossy(&chunk)) {
            match frame.event.as_str() {
                "endpoint" => {
                    if endpoint.is_some() {
                        continue;
                    }
                    let resolved = base
                        .join(frame.data.trim())
                        .with_context(|| format!("Invalid endpoint '{}'", frame.data.trim()))?;
                    info!(endpoint = %resolved, "Remote announced message endpoint");
                    spawn_uplink(client.clone(), resolved.clone(), header_map.clone());
                    endpoint = Some(resolved);
                }
                "message" => match serde_json::from_str::<Value>(&frame.data) {
                    Ok(msg) => {
                        if stdout_tx.send(msg).await.is_err() {
                            bail!("stdout closed");
                        }
                    }
                    Err(e) => {
                        error!(data = %frame.data, error = %e, "Dropping non-JSON SSE message");
                    }
                },
                other => debug!(event = other, "Ignoring SSE event"),
            }
        }
    }

    bail!("Remote SSE stream closed")
}

/// Parent stdin → POST endpoint. Stdin EOF means the parent is gone, at
/// which point the bridge has nothing left to do.
fn spawn_uplink(client: reqwest::Client, endpoint: Url, headers: reqwest::header::HeaderMap) {
    tokio::spawn(async move {
        let mut stdin = spawn_stdin_reader();
        while let Some(msg) = stdin.recv().await {
            let result = client
                .post(endpoint.clone())
                .headers(headers.clone())
                .json(&msg)
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    error!(status = %resp.status(), "Remote rejected message");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Failed to deliver message to remote"),
            }
        }
        info!("stdin closed, shutting down");
        std::process::exit(0);
    });
}
