//! Tool-server subsystem: protocol codec, per-server handles, and the
//! supervisor that owns them.
//!
//! Each tool server is a child process speaking newline-delimited
//! JSON-RPC 2.0 over stdio. The supervisor keeps one [`ServerHandle`]
//! per configured server; a handle multiplexes concurrent requests over
//! the single channel by correlating responses to fresh request ids.

pub mod codec;
pub mod errors;
pub mod handle;
pub mod pending;
pub mod supervisor;
pub mod types;

pub use codec::{classify, Failure, ProtocolError};
pub use errors::ToolServerError;
pub use handle::{LifecycleState, ServerHandle, DEFAULT_CALL_TIMEOUT_MS};
pub use supervisor::{ServerStatus, ToolServerSupervisor};
pub use types::{
    ContentItem, ResultEnvelope, ToolCallOutcome, ToolDescriptor, ToolServerConfig,
    ToolServerKind,
};
