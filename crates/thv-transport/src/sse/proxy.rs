//! Reverse proxy from the local endpoint to the upstream HTTP/SSE server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use thv_core::{MAX_FRAME_BYTES, TransportEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::frame_events;
use crate::lifecycle::EventReporter;
use crate::server::error_response;

/// Headers that are not forwarded in either direction (hop-by-hop).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    // Rewritten by the client for the upstream connection
    "host",
    "content-length",
    // Local credential, never sent upstream
    "authorization",
];

/// Check if a header should be forwarded.
fn should_forward_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| should_forward_header(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Bounded retry for establishing upstream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Limit on each TCP connect attempt.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Idle pooled connections are closed after this long.
pub(crate) const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub(crate) fn build_client(connect_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(10)
        .build()
}

/// Everything the proxy handler needs, shared by all requests.
pub(crate) struct Upstream {
    client: Client,
    base_url: String,
    target: String,
    retry: RetryPolicy,
    /// Set while connection attempts are failing.
    outage: AtomicBool,
    reporter: EventReporter,
    cancel: CancellationToken,
}

/// Why a request could not be relayed.
enum RelayFailure {
    Unreachable { attempts: u32, error: reqwest::Error },
    Request(reqwest::Error),
    /// The instance stopped while retrying.
    Stopped,
}

impl Upstream {
    pub(crate) fn new(
        client: Client,
        target: String,
        retry: RetryPolicy,
        reporter: EventReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            base_url: format!("http://{target}"),
            target,
            retry,
            outage: AtomicBool::new(false),
            reporter,
            cancel,
        }
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base_url)
    }

    /// Send with bounded retry on connection failures.
    ///
    /// During an outage a single attempt is made so callers fail fast.
    async fn send(
        &self,
        method: &reqwest::Method,
        url: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<reqwest::Response, RelayFailure> {
        let attempts = if self.outage.load(Ordering::Acquire) {
            1
        } else {
            self.retry.max_attempts.max(1)
        };
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    if self.outage.swap(false, Ordering::AcqRel) {
                        info!(upstream = %self.target, "Upstream reachable again");
                        self.reporter.report(TransportEvent::BackendRecovered {
                            target: self.target.clone(),
                        });
                    }
                    return Ok(response);
                }
                // No request timeout is set, so a timeout is a connect timeout.
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if attempt >= attempts {
                        if !self.outage.swap(true, Ordering::AcqRel) {
                            error!(upstream = %self.target, attempts, error = %e, "Upstream unreachable");
                            self.reporter.report(TransportEvent::BackendUnreachable {
                                target: self.target.clone(),
                                attempts,
                            });
                        }
                        return Err(RelayFailure::Unreachable { attempts, error: e });
                    }
                    debug!(attempt, backoff_ms = backoff.as_millis(), "Upstream connect failed; retrying");
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err(RelayFailure::Stopped),
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff *= 2;
                }
                Err(e) => return Err(RelayFailure::Request(e)),
            }
        }
    }
}

/// Fallback handler: relay any method and path upstream.
pub(crate) async fn proxy(State(upstream): State<Arc<Upstream>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();

    let body = match to_bytes(body, MAX_FRAME_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Rejected request body");
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body exceeds {MAX_FRAME_BYTES} bytes"),
            );
        }
    };

    let url = upstream.url_for(&path_and_query);
    let headers = forwardable(&parts.headers);
    debug!(method = %parts.method, url = %url, "Forwarding request");

    let response = match upstream.send(&parts.method, &url, &headers, &body).await {
        Ok(response) => response,
        Err(RelayFailure::Unreachable { attempts, error }) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!(
                    "backend {} unreachable after {attempts} attempt(s): {error}",
                    upstream.target()
                ),
            );
        }
        Err(RelayFailure::Request(e)) => {
            warn!(error = %e, "Upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}"));
        }
        Err(RelayFailure::Stopped) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "transport is stopping");
        }
    };

    relay_response(response, upstream.cancel.clone())
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("text/event-stream"))
}

/// Stream an upstream response back, ending the body if the instance stops.
fn relay_response(response: reqwest::Response, cancel: CancellationToken) -> Response {
    let status = response.status();
    let headers = forwardable(response.headers());
    let event_stream = is_event_stream(&headers);

    let body = if event_stream {
        let events = frame_events(response.bytes_stream()).take_until(cancel.cancelled_owned());
        Body::from_stream(events)
    } else {
        let bytes = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .take_until(cancel.cancelled_owned());
        Body::from_stream(bytes)
    };

    let mut relayed = Response::new(body);
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    if event_stream {
        relayed.headers_mut().insert(
            "x-accel-buffering",
            axum::http::HeaderValue::from_static("no"),
        );
    }
    relayed
}
