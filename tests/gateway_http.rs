//! HTTP-level tests for the forward adapters, driven through the axum
//! routers with real child processes (`cat` echoes stdin; the sed responder
//! turns every request into a matching `result` response).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_bridge::config::{Config, ForwardTransport, LogLevel, Mode};
use mcp_bridge::gateway::{self, Health};
use mcp_bridge::routing::ServerBinding;

/// Answers every request with `{"id":..,"jsonrpc":"2.0","result":{}}`.
/// Works because serialized keys are ordered and `method` sorts after `id`.
const RESPONDER: &str = r#"sed -u 's/,"method".*$/,"result":{}}/'"#;

fn test_config() -> Config {
    Config {
        mode: Mode::Forward {
            bindings: vec![],
            transport: ForwardTransport::Sse,
        },
        port: 0,
        base_url: None,
        sse_path: "/sse".to_string(),
        message_path: "/message".to_string(),
        streamable_http_path: "/mcp".to_string(),
        log_level: LogLevel::None,
        cors: None,
        health_endpoints: Vec::new(),
        headers: Vec::new(),
        session_timeout: None,
        protocol_version: "2024-11-05".to_string(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.unwrap()
}

fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Accumulate a streaming body until `needle` shows up (or 5s elapse).
async fn read_until(body: &mut axum::body::BodyDataStream, needle: &str) -> String {
    let mut acc = String::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while !acc.contains(needle) {
            match body.next().await {
                Some(Ok(chunk)) => acc.push_str(&String::from_utf8_lossy(&chunk)),
                _ => break,
            }
        }
    })
    .await;
    acc
}

// ---------------------------------------------------------------------------
// Stateless Streamable HTTP
// ---------------------------------------------------------------------------

mod stateless {
    use super::*;
    use mcp_bridge::gateway::stateless;

    fn router(command: &str) -> Router {
        stateless::router(&ServerBinding::new("/", command), &test_config())
    }

    #[tokio::test]
    async fn get_and_delete_answer_405() {
        let app = router("cat");
        for method in ["GET", "DELETE"] {
            let resp = send(
                &app,
                Request::builder()
                    .method(method)
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
            let body = body_json(resp).await;
            assert_eq!(body["error"]["code"], -32000);
            assert_eq!(body["error"]["message"], "Method not allowed.");
            assert!(body["id"].is_null());
        }
    }

    #[tokio::test]
    async fn auto_init_handshake_is_invisible_to_client() {
        // `cat` echoes the whole conversation back; the echoed handshake
        // must be consumed by the bridge, and the echoed original request is
        // the response the client sees.
        let app = router("cat");
        let resp = send(
            &app,
            post_json("/mcp", &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["method"], "tools/list");
    }

    #[tokio::test]
    async fn client_initialize_is_not_intercepted() {
        let app = router("cat");
        let resp = send(
            &app,
            post_json(
                "/mcp",
                &json!({"jsonrpc": "2.0", "id": 5, "method": "initialize", "params": {}}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], 5);
        assert_eq!(body["method"], "initialize");
    }

    #[tokio::test]
    async fn notification_acknowledged_with_202() {
        let app = router("cat");
        let resp = send(
            &app,
            post_json("/mcp", &json!({"jsonrpc": "2.0", "method": "notifications/x"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn unparseable_body_is_a_400() {
        let app = router("cat");
        let resp = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], -32700);
    }
}

// ---------------------------------------------------------------------------
// Stateful Streamable HTTP
// ---------------------------------------------------------------------------

mod stateful {
    use super::*;
    use mcp_bridge::gateway::streamable;

    fn router_with_timeout(timeout: Option<Duration>) -> Router {
        let mut config = test_config();
        config.session_timeout = timeout;
        streamable::router(&ServerBinding::new("/", RESPONDER), &config)
    }

    fn initialize_request() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}},
        })
    }

    async fn open_session(app: &Router) -> String {
        let resp = send(app, post_json("/mcp", &initialize_request())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let sid = resp
            .headers()
            .get("mcp-session-id")
            .expect("initialize response carries a session id")
            .to_str()
            .unwrap()
            .to_string();
        let body = body_json(resp).await;
        assert_eq!(body["id"], 1);
        assert!(body["result"].is_object());
        sid
    }

    #[tokio::test]
    async fn initialize_creates_and_later_posts_reuse() {
        let app = router_with_timeout(None);
        let sid = open_session(&app).await;

        let resp = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("mcp-session-id", &sid)
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], 2);
        assert!(body["result"].is_object());
    }

    #[tokio::test]
    async fn post_without_session_or_initialize_is_rejected() {
        let app = router_with_timeout(None);
        let resp = send(
            &app,
            post_json("/mcp", &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(
            body["error"]["message"],
            "Bad Request: No valid session ID provided"
        );
        assert!(body["id"].is_null());
    }

    #[tokio::test]
    async fn unknown_session_header_is_rejected() {
        let app = router_with_timeout(None);
        let resp = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("mcp-session-id", "not-a-session")
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn get_and_delete_require_session_header() {
        let app = router_with_timeout(None);
        for method in ["GET", "DELETE"] {
            let resp = send(
                &app,
                Request::builder()
                    .method(method)
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
            assert_eq!(&bytes[..], b"Invalid or missing session ID");
        }
    }

    #[tokio::test]
    async fn delete_terminates_the_session() {
        let app = router_with_timeout(None);
        let sid = open_session(&app).await;

        let resp = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header("mcp-session-id", &sid)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("mcp-session-id", &sid)
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn idle_session_expires() {
        let app = router_with_timeout(Some(Duration::from_millis(150)));
        let sid = open_session(&app).await;

        tokio::time::sleep(Duration::from_millis(500)).await;

        let resp = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("mcp-session-id", &sid)
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(
            body["error"]["message"],
            "Bad Request: No valid session ID provided"
        );
    }
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

mod sse {
    use super::*;
    use mcp_bridge::gateway::sse;

    fn router() -> Router {
        let (router, _child) = sse::router(&ServerBinding::new("/", "cat"), &test_config()).unwrap();
        router
    }

    fn session_id_from(preamble: &str) -> String {
        let marker = "sessionId=";
        let start = preamble.find(marker).expect("endpoint event present") + marker.len();
        preamble[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect()
    }

    #[tokio::test]
    async fn post_without_known_session_is_503() {
        let app = router();
        let resp = send(
            &app,
            post_json("/message?sessionId=missing", &json!({"jsonrpc": "2.0", "id": 1})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = send(&app, post_json("/message", &json!({"jsonrpc": "2.0", "id": 1}))).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn subscribe_receives_endpoint_then_messages() {
        let app = router();
        let resp = send(
            &app,
            Request::builder().uri("/sse").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let mut body = resp.into_body().into_data_stream();

        let preamble = read_until(&mut body, "\n\n").await;
        assert!(preamble.contains("event: endpoint"));
        assert!(preamble.contains("/message?sessionId="));
        let sid = session_id_from(&preamble);

        let resp = send(
            &app,
            post_json(
                &format!("/message?sessionId={sid}"),
                &json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let echoed = read_until(&mut body, "\"method\":\"ping\"").await;
        assert!(echoed.contains("event: message"));
    }

    #[tokio::test]
    async fn child_output_is_broadcast_to_every_subscriber_in_order() {
        let app = router();

        let resp_a = send(&app, Request::builder().uri("/sse").body(Body::empty()).unwrap()).await;
        let mut body_a = resp_a.into_body().into_data_stream();
        let preamble_a = read_until(&mut body_a, "\n\n").await;
        let sid = session_id_from(&preamble_a);

        let resp_b = send(&app, Request::builder().uri("/sse").body(Body::empty()).unwrap()).await;
        let mut body_b = resp_b.into_body().into_data_stream();
        read_until(&mut body_b, "\n\n").await;

        for (id, method) in [(1, "first"), (2, "second")] {
            let resp = send(
                &app,
                post_json(
                    &format!("/message?sessionId={sid}"),
                    &json!({"jsonrpc": "2.0", "id": id, "method": method}),
                ),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        for body in [&mut body_a, &mut body_b] {
            let text = read_until(body, "\"method\":\"second\"").await;
            let first = text.find("\"method\":\"first\"").expect("first message delivered");
            let second = text.find("\"method\":\"second\"").unwrap();
            assert!(first < second, "messages must arrive in line order");
        }
    }
}

// ---------------------------------------------------------------------------
// Multi-server assembly
// ---------------------------------------------------------------------------

mod multi_server {
    use super::*;

    fn app() -> (Router, Arc<Health>) {
        let mut config = test_config();
        config.mode = Mode::Forward {
            bindings: vec![
                ServerBinding::new("/git", "cat"),
                ServerBinding::new("/docker", "cat"),
            ],
            transport: ForwardTransport::StreamableHttp { stateful: false },
        };
        config.health_endpoints = vec!["/healthz".to_string()];
        let health = Arc::new(Health::default());
        let (router, _children) = gateway::build_app(&config, health.clone()).unwrap();
        (router, health)
    }

    #[tokio::test]
    async fn each_prefix_reaches_its_own_binding() {
        let (app, _health) = app();
        for prefix in ["/git", "/docker"] {
            let resp = send(
                &app,
                post_json(
                    &format!("{prefix}/mcp"),
                    &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
                ),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_json(resp).await["method"], "tools/list");
        }
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_404() {
        let (app, _health) = app();
        let resp = send(
            &app,
            post_json("/other/mcp", &json!({"jsonrpc": "2.0", "id": 1, "method": "x"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_endpoint_tracks_readiness() {
        let (app, health) = app();
        let resp = send(
            &app,
            Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        health.set_ready();
        let resp = send(
            &app,
            Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 64).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let mut config = test_config();
        config.mode = Mode::Forward {
            bindings: vec![ServerBinding::new("/", "cat")],
            transport: ForwardTransport::StreamableHttp { stateful: false },
        };
        config.cors = Some(mcp_bridge::config::CorsPolicy::AllowAll);
        let (app, _children) =
            gateway::build_app(&config, Arc::new(Health::default())).unwrap();

        let resp = send(
            &app,
            Request::builder()
                .method("OPTIONS")
                .uri("/mcp")
                .header("origin", "https://app.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }
}
