//! deskagent — tool-invocation subsystem for a desktop LLM assistant.
//!
//! Four layers, bottom up:
//!
//! - [`toolserver`]: child-process tool servers speaking newline-delimited
//!   JSON-RPC over stdio, supervised with a four-state lifecycle.
//! - [`extract`]: pulling structured JSON out of tool-server prose.
//! - [`gateway`]: one trait over local and cloud chat providers, with
//!   degraded (never failing) construction on missing credentials.
//! - [`agent`]: the orchestration loop tying model rounds to tool calls.

pub mod agent;
pub mod extract;
pub mod gateway;
pub mod toolserver;

pub use agent::{AgentLoop, ConversationMessage, TurnOutcome};
pub use extract::{extract_from_envelope, extract_json, ExtractError};
pub use gateway::{build_provider, GatewayConfig, GatewayError, LlmProvider, ProviderKind};
pub use toolserver::{
    ToolCallOutcome, ToolServerConfig, ToolServerError, ToolServerSupervisor,
};
