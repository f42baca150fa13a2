//! Transports that expose an MCP server on a local HTTP endpoint.
//!
//! Two variants share one lifecycle contract ([`McpTransport`]):
//!
//! - [`StdioTransport`] bridges a workload's stdin/stdout to `GET /sse` +
//!   `POST /messages`.
//! - [`SseTransport`] reverse-proxies to a workload that already serves
//!   HTTP+SSE.
//!
//! Build one through [`TransportFactory`], then drive it `setup` → `start` →
//! `stop`. Requests on the local endpoint pass through a [`MiddlewareChain`].

#![deny(unused_crate_dependencies)]

pub mod codec;
pub mod config;
pub mod factory;
mod lifecycle;
pub mod middleware;
mod server;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use codec::{Frame, JsonLineCodec};
pub use config::Config;
pub use factory::TransportFactory;
pub use middleware::{
    BearerAuth, Middleware, MiddlewareChain, Next, RequestLogger, rejection_response,
};
pub use sse::{RetryPolicy, SseTransport};
pub use stdio::StdioTransport;
pub use transport::{McpTransport, Transport};
