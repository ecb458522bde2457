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

//! Stateful stdio ⇄ Streamable-HTTP adapter.
//!
//! One route per binding answering POST, GET and DELETE, with the session id
//! carried in the `Mcp-Session-Id` header. Each session owns a fresh child.
//! A session is created by the first POST whose body is an `initialize`
//! request, reused by later POSTs with the header, and torn down on DELETE,
//! transport failure, child exit, or the idle timeout.
//!
//! Every request increments the session's access count on admission and
//! decrements it exactly once when the response lifecycle ends; the idle
//! timer only runs while the count is zero.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, Weak};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SESSION_ID_HEADER;
use crate::child::{ChildEvent, ChildProcess};
use crate::config::Config;
use crate::error::BridgeError;
use crate::jsonrpc::{self, codes};
use crate::routing::ServerBinding;
use crate::session::{AccessCounter, OwnedAccessGuard};

const NO_SESSION_MESSAGE: &str = "Bad Request: No valid session ID provided";

struct StreamableSession {
    id: String,
    child: Arc<ChildProcess>,
    /// Requests in flight: id key → waiter for the child's response.
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    /// Server-initiated messages, delivered to GET streams.
    notify_tx: broadcast::Sender<Value>,
}

struct StatefulState {
    command: String,
    sessions: Mutex<HashMap<String, Arc<StreamableSession>>>,
    counter: Arc<AccessCounter>,
}

impl StatefulState {
    fn lookup(&self, id: &str) -> Option<Arc<StreamableSession>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Idempotent teardown, keyed off the id captured at session creation.
    fn close_session(&self, id: &str, reason: &str) {
        let removed = self.sessions.lock().unwrap().remove(id);
        if let Some(session) = removed {
            self.counter.clear(id, false, reason);
            session.pending.lock().unwrap().clear();
            session.child.kill();
            info!(session_id = %id, reason, "Streamable session closed");
        }
    }
}

pub fn router(binding: &ServerBinding, config: &Config) -> Router {
    let (counter, expire_rx) = AccessCounter::new(config.session_timeout);
    let state = Arc::new(StatefulState {
        command: binding.command.clone(),
        sessions: Mutex::new(HashMap::new()),
        counter: Arc::new(counter),
    });

    tokio::spawn(expiry_task(Arc::downgrade(&state), expire_rx));

    let route = binding.route(&config.streamable_http_path);
    Router::new()
        .route(
            &route,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(state)
}

async fn expiry_task(
    state: Weak<StatefulState>,
    mut expire_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(session_id) = expire_rx.recv().await {
        let Some(state) = state.upgrade() else { break };
        state.close_session(&session_id, "session idle timeout");
    }
}

fn create_session(state: &Arc<StatefulState>) -> Result<Arc<StreamableSession>, BridgeError> {
    let (child, events) = ChildProcess::spawn(&state.command)?;
    let id = Uuid::new_v4().to_string();
    let session = Arc::new(StreamableSession {
        id: id.clone(),
        child: Arc::new(child),
        pending: Mutex::new(HashMap::new()),
        notify_tx: broadcast::channel(256).0,
    });

    state.sessions.lock().unwrap().insert(id.clone(), session.clone());
    state.counter.inc(&id, "session created");
    tokio::spawn(session_pump(
        Arc::downgrade(state),
        session.clone(),
        events,
    ));
    info!(session_id = %id, command = %state.command, "Streamable session created");
    Ok(session)
}

/// Route child stdout: responses resolve their in-flight request, everything
/// else goes to the session's GET stream. Child exit tears the session down.
async fn session_pump(
    state: Weak<StatefulState>,
    session: Arc<StreamableSession>,
    mut events: mpsc::Receiver<ChildEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChildEvent::Message(msg) => {
                if jsonrpc::is_response(&msg) {
                    let key = jsonrpc::message_id(&msg).map(jsonrpc::id_key);
                    if let Some(tx) = key
                        .and_then(|k| session.pending.lock().unwrap().remove(&k))
                    {
                        let _ = tx.send(msg);
                        continue;
                    }
                }
                // No subscriber is not an error; the message is simply lost,
                // matching a transport with no open server→client stream.
                let _ = session.notify_tx.send(msg);
            }
            ChildEvent::Exit { code } => {
                warn!(session_id = %session.id, code = ?code, "Session child exited");
                if let Some(state) = state.upgrade() {
                    state.close_session(&session.id, "child exited");
                }
                break;
            }
        }
    }
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn with_session_header(mut resp: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        resp.headers_mut()
            .insert(SESSION_ID_HEADER, value);
    }
    resp
}

fn jsonrpc_error(status: StatusCode, code: i32, message: &str, id: Value) -> Response {
    (status, Json(jsonrpc::error_envelope(code, message, id))).into_response()
}

async fn handle_post(
    State(state): State<Arc<StatefulState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let msg: Option<Value> = serde_json::from_slice(&body).ok();

    let (session, _guard) = match header_session_id(&headers) {
        Some(sid) => match state.lookup(&sid) {
            Some(session) => {
                state.counter.inc(&sid, "post");
                let guard = OwnedAccessGuard::new(state.counter.clone(), sid, "post finished");
                (session, guard)
            }
            None => {
                return jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    codes::ERROR_SERVER,
                    NO_SESSION_MESSAGE,
                    Value::Null,
                )
            }
        },
        None => match &msg {
            Some(m) if jsonrpc::is_initialize_request(m) => {
                let session = match create_session(&state) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "Failed to create streamable session");
                        return jsonrpc_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            codes::ERROR_INTERNAL,
                            "Internal server error",
                            Value::Null,
                        );
                    }
                };
                let guard = OwnedAccessGuard::new(
                    state.counter.clone(),
                    session.id.clone(),
                    "initialize finished",
                );
                (session, guard)
            }
            _ => {
                return jsonrpc_error(
                    StatusCode::BAD_REQUEST,
                    codes::ERROR_SERVER,
                    NO_SESSION_MESSAGE,
                    Value::Null,
                )
            }
        },
    };

    let Some(msg) = msg else {
        return with_session_header(
            jsonrpc_error(
                StatusCode::BAD_REQUEST,
                codes::ERROR_PARSE,
                "Parse error",
                Value::Null,
            ),
            &session.id,
        );
    };

    forward(&session, msg).await
}

/// Deliver one client message to the session's child. Requests wait for the
/// matching response; notifications and client responses are acknowledged
/// with 202.
async fn forward(session: &Arc<StreamableSession>, msg: Value) -> Response {
    match jsonrpc::message_id(&msg).cloned() {
        Some(id) if msg.get("method").is_some() => {
            let key = jsonrpc::id_key(&id);
            let (tx, rx) = oneshot::channel();
            session.pending.lock().unwrap().insert(key.clone(), tx);

            if session.child.send(msg).await.is_err() {
                session.pending.lock().unwrap().remove(&key);
                return with_session_header(
                    jsonrpc_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        codes::ERROR_INTERNAL,
                        "Internal server error",
                        id,
                    ),
                    &session.id,
                );
            }

            match rx.await {
                Ok(response) => with_session_header(
                    (StatusCode::OK, Json(response)).into_response(),
                    &session.id,
                ),
                // The waiter is dropped when the session closes under us.
                Err(_) => with_session_header(
                    jsonrpc_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        codes::ERROR_INTERNAL,
                        "Internal server error",
                        id,
                    ),
                    &session.id,
                ),
            }
        }
        _ => match session.child.send(msg).await {
            Ok(()) => with_session_header(StatusCode::ACCEPTED.into_response(), &session.id),
            Err(_) => with_session_header(
                jsonrpc_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::ERROR_INTERNAL,
                    "Internal server error",
                    Value::Null,
                ),
                &session.id,
            ),
        },
    }
}

async fn handle_get(
    State(state): State<Arc<StatefulState>>,
    headers: HeaderMap,
) -> Response {
    let Some((sid, session)) = header_session_id(&headers)
        .and_then(|sid| state.lookup(&sid).map(|s| (sid, s)))
    else {
        return (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response();
    };

    state.counter.inc(&sid, "get stream");
    let guard = OwnedAccessGuard::new(state.counter.clone(), sid.clone(), "get stream closed");

    let rx = session.notify_tx.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| item.ok())
        .map(move |msg| {
            let _keep = &guard;
            Ok::<_, Infallible>(Event::default().event("message").data(msg.to_string()))
        });

    debug!(session_id = %sid, "Server→client stream opened");
    with_session_header(
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response(),
        &sid,
    )
}

async fn handle_delete(
    State(state): State<Arc<StatefulState>>,
    headers: HeaderMap,
) -> Response {
    let Some(sid) = header_session_id(&headers).filter(|sid| state.lookup(sid).is_some()) else {
        return (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response();
    };

    state.counter.inc(&sid, "delete");
    let _guard = OwnedAccessGuard::new(state.counter.clone(), sid.clone(), "delete finished");
    state.close_session(&sid, "client delete");
    with_session_header(StatusCode::OK.into_response(), &sid)
}
