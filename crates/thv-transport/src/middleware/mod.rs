//! Middleware chain applied to every request on a transport's local endpoint.
//!
//! The chain is composed once from an ordered list; the first middleware is
//! the outermost. Each middleware receives the request and a [`Next`] that
//! runs the remainder of the chain followed by the endpoint, and may
//! short-circuit by returning a response without calling it.

mod auth;
mod logging;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thv_core::TransportError;
use tracing::debug;

pub use auth::BearerAuth;
pub use logging::RequestLogger;

type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;
type Endpoint = Box<dyn FnOnce(Request) -> BoxResponseFuture + Send>;

/// A step in the request path of a transport.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handle a request, calling `next.run(request)` to continue the chain.
    async fn handle(&self, request: Request, next: Next) -> Response;
}

/// The rest of the chain after the current middleware, ending at the endpoint.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Run the remaining middleware and the endpoint.
    pub async fn run(self, request: Request) -> Response {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Self {
                    chain: self.chain,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                };
                middleware.handle(request, next).await
            }
            None => (self.endpoint)(request).await,
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &(self.chain.len() - self.index))
            .finish_non_exhaustive()
    }
}

/// Immutable, shareable composition of middleware.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            middlewares: middlewares.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run `request` through the chain, finishing at `endpoint`.
    pub async fn run<F, Fut>(&self, request: Request, endpoint: F) -> Response
    where
        F: FnOnce(Request) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let next = Next {
            chain: Arc::clone(&self.middlewares),
            index: 0,
            endpoint: Box::new(move |request| Box::pin(endpoint(request))),
        };
        next.run(request).await
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Axum adapter: run the chain in front of the wrapped routes.
pub(crate) async fn apply_chain(
    State(chain): State<MiddlewareChain>,
    request: Request,
    next: axum::middleware::Next,
) -> Response {
    chain.run(request, move |request| next.run(request)).await
}

/// Render a rejection as a plain-text response.
///
/// Anything other than [`TransportError::MiddlewareRejected`] becomes a 500.
pub fn rejection_response(error: &TransportError) -> Response {
    match error {
        TransportError::MiddlewareRejected { status, reason } => {
            debug!(status, reason = %reason, "Request rejected by middleware");
            let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::FORBIDDEN);
            let mut response = (status, reason.clone()).into_response();
            if status == StatusCode::UNAUTHORIZED {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            response
        }
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}
