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

//! stdio ⇄ SSE adapter.
//!
//! One long-lived child per binding. `GET <prefix><ssePath>` opens a
//! subscription: the first event names the POST endpoint (including the
//! generated session id), then every child stdout message is fanned out to
//! all live subscribers. `POST <prefix><messagePath>?sessionId=` carries one
//! client→server message.
//!
//! This mode is a 1:1 supervisor: when the child dies, the whole process
//! exits with the child's code.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::child::{ChildEvent, ChildProcess};
use crate::config::Config;
use crate::error::BridgeError;
use crate::routing::ServerBinding;

type SessionTable = Arc<Mutex<HashMap<String, mpsc::Sender<Value>>>>;

struct SseState {
    child: Arc<ChildProcess>,
    sessions: SessionTable,
    /// `<baseUrl><prefix><messagePath>`, what subscribers POST to.
    endpoint: String,
}

pub fn router(
    binding: &ServerBinding,
    config: &Config,
) -> Result<(Router, Arc<ChildProcess>), BridgeError> {
    let (child, events) = ChildProcess::spawn(&binding.command)?;
    let child = Arc::new(child);
    let sessions: SessionTable = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(pump(events, sessions.clone()));

    let sse_route = binding.route(&config.sse_path);
    let message_route = binding.route(&config.message_path);
    let endpoint = format!(
        "{}{}",
        config.base_url.as_deref().unwrap_or(""),
        message_route
    );

    let state = Arc::new(SseState {
        child: child.clone(),
        sessions,
        endpoint,
    });

    let router = Router::new()
        .route(&sse_route, get(handle_subscribe))
        .route(&message_route, post(handle_message))
        .with_state(state);

    Ok((router, child))
}

/// Fan child stdout out to every live subscriber; a failed delivery drops
/// that subscriber. Child death takes the whole bridge down.
async fn pump(mut events: mpsc::Receiver<ChildEvent>, sessions: SessionTable) {
    while let Some(event) = events.recv().await {
        match event {
            ChildEvent::Message(msg) => {
                let targets: Vec<(String, mpsc::Sender<Value>)> = sessions
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(id, tx)| (id.clone(), tx.clone()))
                    .collect();
                for (id, tx) in targets {
                    if tx.try_send(msg.clone()).is_err() {
                        info!(session_id = %id, "Dropping unreachable SSE session");
                        sessions.lock().unwrap().remove(&id);
                    }
                }
            }
            ChildEvent::Exit { code } => {
                error!(code = ?code, "Child exited, terminating bridge");
                std::process::exit(code.unwrap_or(1));
            }
        }
    }
}

async fn handle_subscribe(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Value>(256);
    state
        .sessions
        .lock()
        .unwrap()
        .insert(session_id.clone(), tx.clone());
    info!(session_id = %session_id, "SSE session connected");

    // Closed() resolves once the subscriber's stream side is dropped, which
    // is the disconnect signal for this transport.
    let sessions = state.sessions.clone();
    let id = session_id.clone();
    tokio::spawn(async move {
        tx.closed().await;
        if sessions.lock().unwrap().remove(&id).is_some() {
            info!(session_id = %id, "SSE session disconnected");
        }
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?sessionId={}", state.endpoint, session_id));
    let stream = tokio_stream::once(Ok::<_, Infallible>(endpoint)).chain(
        ReceiverStream::new(rx).map(|msg| Ok(Event::default().event("message").data(msg.to_string()))),
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// The message endpoint consumes the raw body itself; JSON body parsing is
/// deliberately not applied here.
async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> impl IntoResponse {
    let Some(session_id) = query.session_id else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Missing sessionId parameter");
    };
    if !state.sessions.lock().unwrap().contains_key(&session_id) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No active SSE session for the given sessionId",
        );
    }

    let msg: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "Rejecting unparseable message");
            return (StatusCode::BAD_REQUEST, "Invalid message");
        }
    };

    match state.child.send(msg).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Child process unavailable"),
    }
}
