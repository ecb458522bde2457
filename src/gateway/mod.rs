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

//! Forward-mode gateway assembly.
//!
//! Builds one axum application from the configured bindings, wires in health
//! endpoints and the CORS / response-header layers, and serves it with
//! graceful shutdown. Each binding contributes its own routes; an unmatched
//! path is axum's regular 404.

pub mod sse;
pub mod stateless;
pub mod streamable;
pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::child::ChildProcess;
use crate::config::{Config, CorsPolicy, ForwardTransport, Mode};
use crate::error::BridgeError;

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Shared liveness state for `--healthEndpoint` routes.
#[derive(Default)]
pub struct Health {
    ready: AtomicBool,
    failed: AtomicBool,
}

impl Health {
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// A long-lived supervised child died; health stays red from here on.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.failed.load(Ordering::SeqCst)
    }
}

async fn health_handler(
    axum::extract::State(health): axum::extract::State<Arc<Health>>,
) -> (StatusCode, &'static str) {
    if health.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "unhealthy")
    }
}

/// Build the complete forward-mode router. Returned children are the
/// long-lived per-binding processes (SSE and WS modes); streamable modes
/// manage children per session or per request.
pub fn build_app(
    config: &Config,
    health: Arc<Health>,
) -> Result<(Router, Vec<Arc<ChildProcess>>), BridgeError> {
    let Mode::Forward {
        bindings,
        transport,
    } = &config.mode
    else {
        return Err(BridgeError::Config(
            "Forward gateway requires a --stdio or --multiServerConfig mode".to_string(),
        ));
    };

    let mut app = Router::new();
    let mut children = Vec::new();

    for binding in bindings {
        match transport {
            ForwardTransport::Sse => {
                let (router, child) = sse::router(binding, config)?;
                children.push(child);
                app = app.merge(router);
            }
            ForwardTransport::Ws => {
                let (router, child) = ws::router(binding, config, health.clone())?;
                children.push(child);
                app = app.merge(router);
            }
            ForwardTransport::StreamableHttp { stateful: true } => {
                app = app.merge(streamable::router(binding, config));
            }
            ForwardTransport::StreamableHttp { stateful: false } => {
                app = app.merge(stateless::router(binding, config));
            }
        }
        info!(
            prefix = %binding.prefix,
            command = %binding.command,
            "Configured binding"
        );
    }

    for path in &config.health_endpoints {
        let path = if path.starts_with('/') {
            path.clone()
        } else {
            format!("/{path}")
        };
        app = app.merge(
            Router::new()
                .route(&path, get(health_handler))
                .with_state(health.clone()),
        );
    }

    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BridgeError::Config(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BridgeError::Config(format!("Invalid header value: {e}")))?;
        app = app.layer(SetResponseHeaderLayer::overriding(name, value));
    }

    if let Some(policy) = &config.cors {
        app = app.layer(cors_layer(policy));
    }

    Ok((app.layer(TraceLayer::new_for_http()), children))
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]);
    match policy {
        CorsPolicy::AllowAll => layer.allow_origin(Any),
        CorsPolicy::Origins(_) => {
            let policy = policy.clone();
            layer.allow_origin(AllowOrigin::predicate(move |origin, _| {
                origin
                    .to_str()
                    .map(|o| policy.allows(o))
                    .unwrap_or(false)
            }))
        }
    }
}

/// Run the forward gateway until SIGINT/SIGTERM. Long-lived children are
/// killed on the way out.
pub async fn serve(config: Config) -> Result<(), BridgeError> {
    let health = Arc::new(Health::default());
    let (app, children) = build_app(&config, health.clone())?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        BridgeError::Transport(format!("Failed to bind {addr}: {e}"))
    })?;

    health.set_ready();
    info!(addr = %addr, "Gateway listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for child in &children {
        child.kill();
    }

    result.map_err(|e| {
        error!(error = %e, "Server error");
        BridgeError::Transport(e.to_string())
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
