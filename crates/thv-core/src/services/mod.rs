//! Application services built on the ports.

pub mod servers;

pub use servers::{ServerService, ServerServiceError};
