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

//! stdio ⇄ WebSocket adapter.
//!
//! One long-lived child per binding, one WebSocket endpoint per binding at
//! `<prefix><messagePath>`. Inbound frames that parse as JSON go to the
//! child's stdin; child stdout is broadcast to every socket on the binding.
//! A dead child does not disconnect peers (they may be attached to other
//! bindings on the same server), but it turns the health endpoints red.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use super::Health;
use crate::child::{ChildEvent, ChildProcess};
use crate::config::Config;
use crate::error::BridgeError;
use crate::routing::ServerBinding;

struct WsState {
    child: Arc<ChildProcess>,
    broadcast_tx: broadcast::Sender<Value>,
}

pub fn router(
    binding: &ServerBinding,
    config: &Config,
    health: Arc<Health>,
) -> Result<(Router, Arc<ChildProcess>), BridgeError> {
    let (child, events) = ChildProcess::spawn(&binding.command)?;
    let child = Arc::new(child);
    let (broadcast_tx, _) = broadcast::channel(256);

    tokio::spawn(pump(events, broadcast_tx.clone(), health));

    let route = binding.route(&config.message_path);
    let state = Arc::new(WsState {
        child: child.clone(),
        broadcast_tx,
    });
    let router = Router::new()
        .route(&route, get(handle_upgrade))
        .with_state(state);
    Ok((router, child))
}

async fn pump(
    mut events: mpsc::Receiver<ChildEvent>,
    broadcast_tx: broadcast::Sender<Value>,
    health: Arc<Health>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChildEvent::Message(msg) => {
                // No connected sockets is fine; the send just reports zero
                // receivers.
                let _ = broadcast_tx.send(msg);
            }
            ChildEvent::Exit { code } => {
                error!(code = ?code, "WebSocket binding child exited");
                health.mark_failed();
                break;
            }
        }
    }
}

async fn handle_upgrade(
    State(state): State<Arc<WsState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    info!("WebSocket client connected");
    let (mut sink, mut source) = socket.split();
    let mut rx = state.broadcast_tx.subscribe();

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(text.as_str()) {
                            Ok(msg) => {
                                if state.child.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "Ignoring non-JSON WebSocket frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to forward
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Ok(msg) => {
                        if sink.send(Message::Text(msg.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket client lagging, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    info!("WebSocket client disconnected");
}
