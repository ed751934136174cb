//! Per-tunnel transport for the reverse-tunnel relay
//!
//! A [`TunnelAgent`] listens on one dedicated port and pools the raw TCP
//! connections that the remote client machine opens into it. Proxy code asks
//! the agent for a [`TunnelSocket`] and gets one as soon as the client machine
//! provides it.

mod agent;
mod error;
mod socket;

pub use agent::{AgentConfig, AgentEvent, AgentStats, TunnelAgent};
pub use error::{is_transport_churn, AgentError};
pub use socket::TunnelSocket;
