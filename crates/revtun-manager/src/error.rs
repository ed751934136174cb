use revtun_agent::AgentError;
use thiserror::Error;

/// Tunnel registry errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("No tunnel ports available ({capacity} in use)")]
    Capacity { capacity: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tunnel agent error: {0}")]
    Agent(#[from] AgentError),
}
