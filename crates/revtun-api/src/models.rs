use revtun_manager::{AgentStats, ClientState, NewClientInfo};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// Relay capacity overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Active tunnel count
    pub tunnels: usize,
    /// Ports still free for new tunnels
    pub available_ports: usize,
    pub port_range: PortRange,
}

/// Active tunnel identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelList {
    pub tunnels: Vec<String>,
}

/// Request to create a new tunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTunnelRequest {
    /// Preferred identifier; replaced by a generated one if invalid or taken
    #[serde(default)]
    pub id: Option<String>,
}

/// Response for a created tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTunnelResponse {
    pub id: String,
    /// Port the client machine connects its sockets to
    pub port: u16,
    /// Maximum sockets the client machine may keep open
    pub max_conn_count: usize,
}

impl From<NewClientInfo> for CreateTunnelResponse {
    fn from(info: NewClientInfo) -> Self {
        Self {
            id: info.id,
            port: info.port,
            max_conn_count: info.max_conn_count,
        }
    }
}

/// Tunnel information
#[derive(Debug, Clone, Serialize)]
pub struct TunnelInfo {
    pub id: String,
    pub state: ClientState,
    pub port: Option<u16>,
    pub stats: AgentStats,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}
