mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use common::{FakeProcess, NetworkRuntime, closed_port, serve, wait_for_state};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use thv_core::{TransportError, TransportEvent, TransportState, TransportType};
use thv_transport::{BearerAuth, Config, McpTransport, RetryPolicy, SseTransport};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct ClientQuery {
    client: usize,
}

fn event_text(client: usize) -> String {
    (0..3)
        .map(|n| format!("event: message\ndata: {{\"client\":{client},\"n\":{n}}}\n\n"))
        .collect()
}

/// Event stream deliberately chunked across event boundaries.
async fn events(Query(query): Query<ClientQuery>) -> Response {
    let text = event_text(query.client).into_bytes();
    let chunks: Vec<Result<Bytes, std::io::Error>> = text
        .chunks(7)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream::iter(chunks)))
        .unwrap()
}

async fn echo(body: Bytes) -> Bytes {
    body
}

/// Reports whether the request carried an `Authorization` header.
async fn saw_auth(headers: HeaderMap) -> axum::Json<Value> {
    axum::Json(json!({ "authorization": headers.contains_key(header::AUTHORIZATION) }))
}

async fn counted_echo(State(hits): State<Arc<AtomicUsize>>, body: Bytes) -> Bytes {
    hits.fetch_add(1, Ordering::SeqCst);
    body
}

/// Upstream that counts every request it receives on `/echo`.
fn counting_upstream(hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/echo", post(counted_echo))
        .with_state(hits)
}

fn upstream() -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/echo", post(echo))
        .route("/auth", get(saw_auth))
        .route("/health", get(|| async { "upstream" }))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(1),
    }
}

async fn running(transport: SseTransport) -> (SseTransport, String) {
    transport.setup().await.unwrap();
    transport.start().await.unwrap();
    let base = format!("http://{}", transport.local_addr().unwrap());
    (transport, base)
}

fn config_for(port: u16, runtime: NetworkRuntime) -> Config {
    Config::new(TransportType::Sse, Arc::new(runtime)).with_target_port(port)
}

#[tokio::test]
async fn concurrent_clients_never_see_each_others_streams() {
    let upstream_addr = serve(upstream()).await;
    let config = config_for(upstream_addr.port(), NetworkRuntime::default());
    let (transport, base) = running(SseTransport::new(config)).await;
    assert_eq!(transport.target(), Some(upstream_addr.to_string().as_str()));

    let client = reqwest::Client::new();
    let tasks: Vec<_> = (0..8)
        .map(|id| {
            let client = client.clone();
            let base = base.clone();
            tokio::spawn(async move {
                let response = client
                    .get(format!("{base}/events?client={id}"))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(response.status(), 200);
                assert_eq!(response.headers()["content-type"], "text/event-stream");
                let text = response.text().await.unwrap();
                assert_eq!(text, event_text(id));

                let echoed = client
                    .post(format!("{base}/echo"))
                    .body(format!("payload-{id}"))
                    .send()
                    .await
                    .unwrap()
                    .text()
                    .await
                    .unwrap();
                assert_eq!(echoed, format!("payload-{id}"));
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn health_is_local_and_credentials_stay_local() {
    let upstream_addr = serve(upstream()).await;
    let config = config_for(upstream_addr.port(), NetworkRuntime::default());
    let (transport, base) = running(SseTransport::new(config)).await;

    let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health, json!({ "status": "ok" }));

    let seen: Value = reqwest::Client::new()
        .get(format!("{base}/auth"))
        .bearer_auth("local-only")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(seen, json!({ "authorization": false }));

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn bearer_auth_matrix() {
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream_addr = serve(counting_upstream(hits.clone())).await;
    let config = config_for(upstream_addr.port(), NetworkRuntime::default())
        .with_middleware(Arc::new(BearerAuth::new(Some("s3cret".to_string()))));
    let (transport, base) = running(SseTransport::new(config)).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/echo");

    let rejected = [
        (None, "Authorization header required"),
        (Some("s3cret"), "Invalid Authorization header format"),
        (Some("bearer s3cret"), "Invalid Authorization header format"),
        (Some("Bearer nope"), "Invalid token"),
    ];
    for (header, body) in rejected {
        let mut request = client.post(&url).body("ping");
        if let Some(header) = header {
            request = request.header("authorization", header);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 401, "header {header:?}");
        assert_eq!(response.text().await.unwrap(), body);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let accepted = client
        .post(&url)
        .header("authorization", "Bearer s3cret")
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);
    assert_eq!(accepted.text().await.unwrap(), "ping");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_reports_once_and_recovers() {
    let port = closed_port().await;
    let transport = SseTransport::new(config_for(port, NetworkRuntime::default()))
        .with_retry_policy(fast_retry());
    let mut events = transport.take_events().unwrap();
    let (transport, base) = running(transport).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client.get(format!("{base}/events?client=0")).send().await.unwrap();
        assert_eq!(response.status(), 502);
    }
    assert_eq!(
        events.try_recv().unwrap(),
        TransportEvent::BackendUnreachable {
            target: format!("127.0.0.1:{port}"),
            attempts: 3,
        }
    );
    assert!(events.try_recv().is_err());
    assert!(transport.is_running());

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, upstream()).await;
    });

    let response = client.get(format!("{base}/events?client=4")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), event_text(4));
    assert_eq!(
        events.try_recv().unwrap(),
        TransportEvent::BackendRecovered {
            target: format!("127.0.0.1:{port}"),
        }
    );

    transport.stop().await.unwrap();
}

#[tokio::test]
async fn runtime_address_is_used_without_target_port() {
    let upstream_addr = serve(upstream()).await;
    let runtime = NetworkRuntime {
        address: Some(("127.0.0.1".to_string(), upstream_addr.port())),
        process: None,
    };
    let config = Config::new(TransportType::Sse, Arc::new(runtime));
    let (transport, base) = running(SseTransport::new(config)).await;

    let echoed = reqwest::Client::new()
        .post(format!("{base}/echo"))
        .body("via runtime")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(echoed, "via runtime");
    transport.stop().await.unwrap();
}

#[tokio::test]
async fn missing_target_fails_start_and_releases_the_process() {
    let process = FakeProcess::new();
    let runtime = NetworkRuntime {
        address: None,
        process: Some(process.clone()),
    };
    let transport = SseTransport::new(Config::new(TransportType::Sse, Arc::new(runtime)));
    transport.setup().await.unwrap();

    let err = transport.start().await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidConfig(_)));
    assert!(process.was_terminated());
    assert!(!transport.is_running());
    assert!(transport.local_addr().is_none());
}

#[tokio::test]
async fn owned_process_is_supervised() {
    let upstream_addr = serve(upstream()).await;
    let process = FakeProcess::new();
    let runtime = NetworkRuntime {
        address: None,
        process: Some(process.clone()),
    };
    let transport = SseTransport::new(config_for(upstream_addr.port(), runtime));
    let mut events = transport.take_events().unwrap();
    let (transport, base) = running(transport).await;

    process.exit(Some(1));
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, TransportEvent::BackendTerminated { exit_code: Some(1) });
    wait_for_state(&transport, TransportState::Stopped).await;

    transport.stop().await.unwrap();
    assert!(events.try_recv().is_err());
    assert!(reqwest::get(format!("{base}/health")).await.is_err());
}

#[tokio::test]
async fn stop_terminates_owned_process() {
    let upstream_addr = serve(upstream()).await;
    let process = FakeProcess::new();
    let runtime = NetworkRuntime {
        address: None,
        process: Some(process.clone()),
    };
    let (transport, _) = running(SseTransport::new(config_for(upstream_addr.port(), runtime))).await;

    transport.stop().await.unwrap();
    transport.stop().await.unwrap();
    assert!(process.was_terminated());
    assert_eq!(transport.state(), TransportState::Stopped);
}

#[tokio::test]
async fn stop_ends_open_streams() {
    let upstream_addr = serve(Router::new().route(
        "/sse",
        get(|| async {
            let first = stream::once(async {
                Ok::<_, std::io::Error>(Bytes::from_static(b"event: endpoint\ndata: /messages\n\n"))
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(first.chain(stream::pending())))
                .unwrap()
        }),
    ))
    .await;
    let config = config_for(upstream_addr.port(), NetworkRuntime::default());
    let (transport, base) = running(SseTransport::new(config)).await;

    let response = reqwest::get(format!("{base}/sse")).await.unwrap();
    let mut reader = common::SseReader::new(response);
    let (name, data) = reader.expect_event(WAIT).await;
    assert_eq!((name.as_str(), data.as_str()), ("endpoint", "/messages"));

    tokio::time::timeout(WAIT, transport.stop()).await.unwrap().unwrap();
    let ended = tokio::time::timeout(WAIT, reader.next_event()).await.unwrap();
    assert!(ended.is_none());
}
