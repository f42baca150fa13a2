//! Request logging.

use std::time::Instant;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use tracing::info;

use super::{Middleware, Next};

/// Logs method, path, status and latency of every request at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl RequestLogger {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "request-logger"
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();

        let response = next.run(request).await;

        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis(),
            "Handled request"
        );
        response
    }
}
