//! Instance descriptions: what the lifecycle manager reports and what is shown to users.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::labels::{self, Labels};

/// Number of characters kept when displaying an instance id.
pub const SHORT_ID_LEN: usize = 12;

/// Tool type of instances that belong in a client `mcpServers` config.
pub const MCP_TOOL_TYPE: &str = "mcp";

/// An instance as reported by the lifecycle manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    #[serde(default)]
    pub labels: Labels,
}

/// Display-ready description of a managed MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub transport: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_type: String,
    pub port: u16,
    pub url: String,
}

impl ServerInfo {
    /// Derive a description from labels, publishing the URL on `host`.
    ///
    /// The name label wins over the container name; a missing or unparsable
    /// port becomes 0 and leaves the URL empty.
    pub fn from_container(container: &ContainerInfo, host: &str) -> Self {
        let name = display_name(container).to_string();
        let port = labels::port(&container.labels).unwrap_or(0);
        let url = if port > 0 {
            mcp_server_url(host, port, &name)
        } else {
            String::new()
        };

        Self {
            id: short_id(&container.id).to_string(),
            name,
            image: container.image.clone(),
            state: container.state.clone(),
            transport: labels::transport_type(&container.labels).to_string(),
            tool_type: labels::tool_type(&container.labels)
                .unwrap_or_default()
                .to_string(),
            port,
            url,
        }
    }

    /// Whether this server should appear in a client `mcpServers` config.
    pub fn is_mcp(&self) -> bool {
        self.tool_type == MCP_TOOL_TYPE
    }
}

/// Name an instance is known by: the name label, or the container name.
pub fn display_name(container: &ContainerInfo) -> &str {
    labels::container_name(&container.labels).unwrap_or(&container.name)
}

/// First [`SHORT_ID_LEN`] characters of an id.
pub fn short_id(id: &str) -> &str {
    id.char_indices()
        .nth(SHORT_ID_LEN)
        .map_or(id, |(end, _)| &id[..end])
}

/// URL clients use to reach a published server.
///
/// The fragment carries the server name so a client config can tell
/// servers apart when they share a host.
pub fn mcp_server_url(host: &str, port: u16, name: &str) -> String {
    format!("http://{}/sse#{name}", authority(host, port))
}

/// `host:port`, bracketing IPv6 literals.
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Entry of a client `mcpServers` config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub url: String,
}

/// Client configuration listing MCP servers by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

impl McpServersConfig {
    /// Build from descriptions, keeping only servers of tool type `mcp`.
    pub fn from_servers<'a>(servers: impl IntoIterator<Item = &'a ServerInfo>) -> Self {
        let mcp_servers = servers
            .into_iter()
            .filter(|server| server.is_mcp())
            .map(|server| {
                (
                    server.name.clone(),
                    McpServerEntry {
                        url: server.url.clone(),
                    },
                )
            })
            .collect();
        Self { mcp_servers }
    }
}
