use revtun_agent::AgentError;
use thiserror::Error;

/// Errors raised while proxying public traffic over a tunnel socket
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Tunnel unavailable: {0}")]
    Agent(#[from] AgentError),

    #[error("HTTP handshake over tunnel socket failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("Tunnel request failed: {0}")]
    Request(#[source] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
