//! Read-only accessors over the labels attached to a managed instance.
//!
//! Labels are written by whatever launched the instance; this module only
//! interprets them. Every accessor tolerates an empty map.

use std::collections::HashMap;

use crate::error::LabelError;

/// Marks an instance as managed (`"true"`).
pub const LABEL_TOOLHIVE: &str = "toolhive";
/// Logical server name.
pub const LABEL_NAME: &str = "toolhive-name";
/// Transport kind the instance was launched with.
pub const LABEL_TRANSPORT: &str = "toolhive-transport";
/// Published local port.
pub const LABEL_PORT: &str = "toolhive-port";
/// Tool category, `mcp` for MCP servers.
pub const LABEL_TOOL_TYPE: &str = "toolhive-tool-type";

/// Transport value reported when the label is absent.
pub const UNKNOWN_TRANSPORT: &str = "unknown";

/// Label map as attached to a container or process.
pub type Labels = HashMap<String, String>;

fn non_empty<'a>(labels: &'a Labels, key: &str) -> Option<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Whether the instance carries the managed marker.
pub fn is_managed(labels: &Labels) -> bool {
    labels
        .get(LABEL_TOOLHIVE)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

/// Logical server name, if recorded.
pub fn container_name(labels: &Labels) -> Option<&str> {
    non_empty(labels, LABEL_NAME)
}

/// Transport kind as recorded, or `"unknown"`.
///
/// The value is returned verbatim; it is display data, not parsed into a
/// [`TransportType`](crate::TransportType).
pub fn transport_type(labels: &Labels) -> &str {
    non_empty(labels, LABEL_TRANSPORT).unwrap_or(UNKNOWN_TRANSPORT)
}

/// Tool category, if recorded.
pub fn tool_type(labels: &Labels) -> Option<&str> {
    non_empty(labels, LABEL_TOOL_TYPE)
}

/// Published port.
pub fn port(labels: &Labels) -> Result<u16, LabelError> {
    let raw = non_empty(labels, LABEL_PORT).ok_or(LabelError::Missing(LABEL_PORT))?;
    raw.trim().parse().map_err(|_| LabelError::Invalid {
        key: LABEL_PORT,
        value: raw.to_string(),
    })
}
