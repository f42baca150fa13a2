//! Local HTTP+SSE endpoint of the stdio transport.
//!
//! - `GET /sse`: opens a session; the first event is `endpoint`, then
//!   `message` events carry backend frames.
//! - `POST /messages?session_id=<id>`: submits one message to the backend.
//! - `GET /health`: liveness, outside the middleware chain.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use thv_core::{FrameError, MAX_FRAME_BYTES};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sessions::{SessionGuard, SessionRegistry};
use crate::codec::Frame;
use crate::middleware::{MiddlewareChain, apply_chain};
use crate::server::{error_response, health};

/// Interval between SSE keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub(crate) struct StdioState {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) stdin: mpsc::Sender<Frame>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MessageQuery {
    session_id: Option<String>,
    #[serde(rename = "sessionId")]
    session_id_alias: Option<String>,
}

impl MessageQuery {
    fn session(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or(self.session_id_alias.as_deref())
            .filter(|id| !id.is_empty())
    }
}

pub(crate) fn router(state: StdioState, chain: &MiddlewareChain) -> Router {
    let mut routes = Router::new()
        .route("/sse", get(open_session))
        .route("/messages", post(post_message));
    if !chain.is_empty() {
        routes = routes.route_layer(middleware::from_fn_with_state(chain.clone(), apply_chain));
    }
    routes.route("/health", get(health)).with_state(state)
}

async fn open_session(State(state): State<StdioState>) -> Response {
    let Some((id, receiver)) = state.registry.open() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "backend is not running");
    };
    session_stream(state.registry, id, receiver).into_response()
}

fn session_stream(
    registry: Arc<SessionRegistry>,
    id: String,
    receiver: mpsc::Receiver<Frame>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session_id={id}"));
    let guard = SessionGuard::new(registry, id);

    let messages = stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        let frame = receiver.recv().await?;
        let event = Event::default().event("message").data(frame.as_text());
        Some((Ok(event), (receiver, guard)))
    });

    let events = stream::once(async move { Ok(endpoint) }).chain(messages);
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

async fn post_message(
    State(state): State<StdioState>,
    Query(query): Query<MessageQuery>,
    body: Body,
) -> Response {
    let Some(session) = query.session() else {
        return error_response(StatusCode::BAD_REQUEST, "session_id is required");
    };
    if state.registry.is_closed() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "backend is not running");
    }
    if !state.registry.contains(session) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown session {session}"));
    }

    let bytes = match to_bytes(body, MAX_FRAME_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Rejected oversized or unreadable body");
            let err = FrameError::Oversized {
                limit: MAX_FRAME_BYTES,
            };
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };
    let frame = match Frame::parse_single_line(bytes) {
        Ok(frame) => frame,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    state.registry.track_requests(session, &frame);
    if state.stdin.send(frame).await.is_err() {
        warn!(session = %session, "Backend stdin is closed");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "backend is not running");
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}
