//! Tunnel registry for the reverse-tunnel relay
//!
//! The [`ClientManager`] hands out tunnel identifiers and ports from a fixed
//! pool, builds an agent and client per tunnel, and forgets tunnels once they
//! close.

mod config;
mod error;
pub mod id;
mod manager;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::{ClientManager, NewClientInfo};

pub use revtun_agent::{AgentStats, TunnelAgent};
pub use revtun_client::{Client, ClientConfig, ClientState};
