//! Tunnel agent errors

use std::io;
use thiserror::Error;

/// Tunnel agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Tunnel agent already started")]
    AlreadyStarted,

    #[error("Tunnel agent closed")]
    Closed,

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try a different tunnel port range")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Whether an I/O error is ordinary connection churn (peer reset, timeout,
/// half-closed pipe) rather than a real failure.
pub fn is_transport_churn(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}
