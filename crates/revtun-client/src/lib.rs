//! Tunnel client: lifecycle and protocol translation
//!
//! A [`Client`] pairs a [`TunnelAgent`](revtun_agent::TunnelAgent) with a
//! tunnel identifier. It closes itself when the client machine does not
//! connect (or reconnect) within the configured grace periods, and turns
//! public HTTP requests and upgrades into traffic over tunnel sockets.

mod client;
mod error;
pub mod handshake;

pub use client::{Client, ClientConfig, ClientState, ProxyBody};
pub use error::ProxyError;
pub use handshake::encode_request_head;
