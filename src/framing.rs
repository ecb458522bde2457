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

//! Stdio framing.
//!
//! MCP stdio servers emit one JSON-RPC message per line, terminated by `\n`
//! or `\r\n`. The decoder buffers the partial tail, skips blank lines, and
//! drops lines that are not valid JSON after logging them. The encoder writes
//! one serialized object plus a single `\n`.

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::error;

#[derive(Debug, Default)]
pub struct LineCodec {
    _priv: (),
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Value;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                // Partial tail stays in the buffer verbatim.
                return Ok(None);
            };

            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            // Invalid UTF-8 is replaced and then almost certainly fails the
            // JSON parse below, which is the drop path we want anyway.
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(text) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    error!(line = %text, error = %e, "Dropping non-JSON line from child");
                    continue;
                }
            }
        }
    }
}

impl Encoder<&Value> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: &Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(item)?;
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}
