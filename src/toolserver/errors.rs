//! Tool-server error types.

use thiserror::Error;

use super::codec::ProtocolError;

/// Errors that can occur in the supervisor and its handles.
#[derive(Debug, Error)]
pub enum ToolServerError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed or timed out.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O failure on the server's stdio channel.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// Classified protocol-level error from the server.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A request did not receive a response within its budget.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// The server's process is gone or degraded — terminal for pending
    /// requests on the handle.
    #[error("server '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    /// A pending request was dropped by an explicit stop.
    #[error("request to server '{name}' cancelled: {reason}")]
    Cancelled { name: String, reason: String },

    /// No server with that name has ever been started.
    #[error("unknown server: '{name}'")]
    UnknownServer { name: String },

    /// The handle exists but is not in the `Ready` state.
    #[error("server '{name}' is not ready (state: {state})")]
    NotReady { name: String, state: String },

    /// All restart attempts exhausted for a server.
    #[error("server '{name}' failed after {attempts} restart attempts")]
    RestartExhausted { name: String, attempts: u32 },

    /// Configuration error (disabled server, bad config).
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl ToolServerError {
    /// True when future calls on the same handle will also fail until it
    /// is restarted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolServerError::Unavailable { .. } | ToolServerError::Cancelled { .. }
        )
    }
}
