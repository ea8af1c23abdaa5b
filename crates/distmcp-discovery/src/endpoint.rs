use serde::{Deserialize, Serialize};

/// The single protocol family this pool supports.
///
/// Registries may track servers speaking other protocols; their snapshots
/// are filtered out at subscription time and re-checked defensively by the
/// reconciler.
pub const PROTOCOL_STREAMABLE: &str = "mcp-streamable";

/// One network-reachable instance of a backend MCP server.
///
/// Immutable once observed. Two endpoints are the "same network location"
/// when their (address, port) pair matches; other fields never force a
/// reconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpEndpoint {
    pub address: String,
    pub port: u16,
}

impl McpEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// True when `other` points at the same network location.
    pub fn same_location(&self, other: &McpEndpoint) -> bool {
        self.address == other.address && self.port == other.port
    }
}

/// Stable identity string for one endpoint under a given export path.
///
/// Used as the client-map key: it distinguishes "same endpoint, different
/// client" (path changed) from "new endpoint".
pub fn endpoint_key(endpoint: &McpEndpoint, export_path: &str) -> String {
    format!("{}:{}:{}", endpoint.address, endpoint.port, export_path)
}

/// Full server-endpoint descriptor at one point in time.
///
/// The export path and protocol are shared across all member endpoints.
/// Exactly one snapshot is current per pool; reconciliation replaces it
/// wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub endpoints: Vec<McpEndpoint>,
    pub export_path: String,
    pub protocol: String,
    pub version: String,
}

impl ServerEndpoint {
    pub fn new(
        endpoints: Vec<McpEndpoint>,
        export_path: impl Into<String>,
        protocol: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            endpoints,
            export_path: export_path.into(),
            protocol: protocol.into(),
            version: version.into(),
        }
    }

    /// Endpoints of `self` with no (address, port) match in `other`.
    ///
    /// `new.missing_from(current)` is the add set of a reconciliation;
    /// `current.missing_from(new)` is the remove set.
    pub fn missing_from(&self, other: &ServerEndpoint) -> Vec<McpEndpoint> {
        self.endpoints
            .iter()
            .filter(|endpoint| {
                !other
                    .endpoints
                    .iter()
                    .any(|candidate| candidate.same_location(endpoint))
            })
            .cloned()
            .collect()
    }
}
