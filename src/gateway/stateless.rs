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

//! Stateless stdio ⇄ Streamable-HTTP adapter.
//!
//! Every POST gets a fresh child and a fresh request-id space, so concurrent
//! clients can never collide. GET and DELETE are not part of this mode and
//! answer 405.
//!
//! MCP servers insist on an `initialize` handshake before anything else, and
//! a client talking through a stateless endpoint has nowhere to keep that
//! state. When the posted message is not itself an `initialize` request, the
//! adapter performs the handshake on the client's behalf: it sends its own
//! `initialize`, waits for the response, emits `notifications/initialized`,
//! then replays the original message. The synthetic handshake response never
//! reaches the client.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::child::{ChildEvent, ChildProcess};
use crate::config::Config;
use crate::jsonrpc::{self, codes};
use crate::routing::ServerBinding;

struct StatelessState {
    command: String,
    protocol_version: String,
}

pub fn router(binding: &ServerBinding, config: &Config) -> Router {
    let state = Arc::new(StatelessState {
        command: binding.command.clone(),
        protocol_version: config.protocol_version.clone(),
    });
    let route = binding.route(&config.streamable_http_path);
    Router::new()
        .route(
            &route,
            post(handle_post)
                .get(method_not_allowed)
                .delete(method_not_allowed),
        )
        .with_state(state)
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(jsonrpc::error_envelope(
            codes::ERROR_SERVER,
            "Method not allowed.",
            Value::Null,
        )),
    )
        .into_response()
}

/// What the interposer wants done with one child→network message.
enum Disposition {
    /// Pass it through to the network side.
    Forward(Value),
    /// Swallow it and write these follow-ups to the child instead.
    Suppress(Vec<Value>),
}

/// Per-POST auto-initialize state machine.
struct Interposer {
    initialized: bool,
    pending_original: Option<Value>,
    tracked_init_id: Option<Value>,
    auto_initializing: bool,
    protocol_version: String,
}

impl Interposer {
    fn new(protocol_version: String) -> Self {
        Self {
            initialized: false,
            pending_original: None,
            tracked_init_id: None,
            auto_initializing: false,
            protocol_version,
        }
    }

    /// Messages to write to the child for one network→child message.
    fn on_client_message(&mut self, msg: Value) -> Vec<Value> {
        if jsonrpc::is_initialize_request(&msg) {
            self.tracked_init_id = msg.get("id").cloned();
            self.auto_initializing = false;
            return vec![msg];
        }
        if !self.initialized {
            let init_id = generate_init_id();
            self.pending_original = Some(msg);
            self.tracked_init_id = Some(Value::String(init_id.clone()));
            self.auto_initializing = true;
            return vec![json!({
                "jsonrpc": "2.0",
                "id": init_id,
                "method": "initialize",
                "params": {
                    "protocolVersion": self.protocol_version,
                    "capabilities": {
                        "roots": { "listChanged": true },
                        "sampling": {},
                    },
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                },
            })];
        }
        vec![msg]
    }

    /// Disposition for one child→network message.
    fn on_child_message(&mut self, msg: Value) -> Disposition {
        let tracked = self
            .tracked_init_id
            .as_ref()
            .zip(jsonrpc::message_id(&msg))
            .map(|(a, b)| a == b)
            .unwrap_or(false);
        if !tracked {
            return Disposition::Forward(msg);
        }

        self.initialized = true;
        self.tracked_init_id = None;
        if self.auto_initializing {
            self.auto_initializing = false;
            let original = self.pending_original.take();
            let mut follow_ups = vec![jsonrpc::notification("notifications/initialized")];
            follow_ups.extend(original);
            Disposition::Suppress(follow_ups)
        } else {
            Disposition::Forward(msg)
        }
    }
}

/// `init_<millis>_<9 random base-36 chars>`, unique within a child's
/// lifetime and recognizable in logs.
fn generate_init_id() -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("init_{millis}_{suffix}")
}

async fn handle_post(State(state): State<Arc<StatelessState>>, body: Bytes) -> Response {
    let msg: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Rejecting unparseable POST body");
            return (
                StatusCode::BAD_REQUEST,
                Json(jsonrpc::error_envelope(
                    codes::ERROR_PARSE,
                    "Parse error",
                    Value::Null,
                )),
            )
                .into_response();
        }
    };

    // Fresh child and transport per POST; the child dies with this handler.
    let (child, mut events) = match ChildProcess::spawn(&state.command) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "Failed to spawn child for stateless request");
            return internal_error(Value::Null);
        }
    };

    let original_id = jsonrpc::message_id(&msg).cloned();
    let expects_response = jsonrpc::is_request(&msg);
    let mut interposer = Interposer::new(state.protocol_version.clone());

    for out in interposer.on_client_message(msg) {
        if child.send(out).await.is_err() {
            return internal_error(original_id.unwrap_or(Value::Null));
        }
    }

    while let Some(event) = events.recv().await {
        match event {
            ChildEvent::Message(incoming) => match interposer.on_child_message(incoming) {
                Disposition::Suppress(follow_ups) => {
                    for out in follow_ups {
                        if child.send(out).await.is_err() {
                            return internal_error(original_id.unwrap_or(Value::Null));
                        }
                    }
                    if !expects_response {
                        return StatusCode::ACCEPTED.into_response();
                    }
                }
                Disposition::Forward(response) => {
                    let matches_request = original_id
                        .as_ref()
                        .zip(jsonrpc::message_id(&response))
                        .map(|(a, b)| a == b)
                        .unwrap_or(false);
                    if matches_request {
                        return (StatusCode::OK, Json(response)).into_response();
                    }
                    debug!("Dropping unrelated child message in stateless request");
                }
            },
            ChildEvent::Exit { code } => {
                warn!(code = ?code, "Child exited before answering stateless request");
                return internal_error(original_id.unwrap_or(Value::Null));
            }
        }
    }

    internal_error(original_id.unwrap_or(Value::Null))
}

fn internal_error(id: Value) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(jsonrpc::error_envelope(
            codes::ERROR_INTERNAL,
            "Internal server error",
            id,
        )),
    )
        .into_response()
}
