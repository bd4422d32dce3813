//! Agent loop — drives the model, executes its tool directives, and
//! assembles the final turn outcome.

pub mod directive;
pub mod turn;
pub mod types;

pub use directive::{
    contains_directive, scan_directives, strip_directives, Directive, ToolDirective,
};
pub use turn::{AgentLoop, DEFAULT_MAX_ROUNDS};
pub use types::{ConversationMessage, Role, TurnOutcome};
