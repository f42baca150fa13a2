//! Bearer token authentication.

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{HeaderMap, header};
use axum::response::Response;
use subtle::ConstantTimeEq;
use thv_core::TransportError;
use tracing::warn;

use super::{Middleware, Next, rejection_response};

const BEARER_PREFIX: &str = "Bearer ";

/// Requires `Authorization: Bearer <token>` when a token is configured.
///
/// The decision depends only on the request headers, so a retried request
/// gets the same answer.
#[derive(Clone)]
pub struct BearerAuth {
    token: Option<String>,
}

impl BearerAuth {
    /// `None` disables authentication; every request passes.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check the request headers against the configured token.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), TransportError> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };

        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Err(unauthorized("Authorization header required"));
        };
        let Some(presented) = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        else {
            return Err(unauthorized("Invalid Authorization header format"));
        };

        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(unauthorized("Invalid token"))
        }
    }
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn unauthorized(reason: &str) -> TransportError {
    TransportError::MiddlewareRejected {
        status: 401,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    fn name(&self) -> &str {
        "bearer-auth"
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        match self.authorize(request.headers()) {
            Ok(()) => next.run(request).await,
            Err(rejection) => {
                warn!(path = %request.uri().path(), error = %rejection, "Unauthorized request");
                rejection_response(&rejection)
            }
        }
    }
}
