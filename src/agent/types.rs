//! Shared types for the agent loop.
//!
//! Conversation messages as stored in history, and the outcome of one
//! full orchestration turn.

use serde::{Deserialize, Serialize};

use crate::gateway::{ChatMessage, MessageRole};
use crate::toolserver::ToolCallOutcome;

/// Message role in conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool results fed back into the conversation.
    Tool,
}

/// A single message stored in conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message identifier.
    pub id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            role,
            content: content.into(),
        }
    }

    /// Project this history record into a gateway chat message.
    ///
    /// Tool results ride as user content: not every provider has a
    /// native tool role, and the result markers carry the structure.
    pub fn to_chat(&self) -> ChatMessage {
        let role = match self.role {
            Role::System => MessageRole::System,
            Role::User | Role::Tool => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        };
        ChatMessage {
            role,
            content: self.content.clone(),
        }
    }
}

/// The result of one full orchestration turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// The model's prose from the round that first requested tools
    /// (directive blocks removed). Empty if no tools were used.
    pub analysis: String,
    /// Every tool call executed during the turn, in execution order.
    pub tool_results: Vec<ToolCallOutcome>,
    /// The model's final text after all tool rounds.
    pub final_response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_gets_id_and_timestamp() {
        let msg = ConversationMessage::new(Role::User, "hello");
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp.contains('T'));
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn ids_are_unique() {
        let a = ConversationMessage::new(Role::User, "x");
        let b = ConversationMessage::new(Role::User, "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_role_projects_to_user_chat_message() {
        let msg = ConversationMessage::new(Role::Tool, "results");
        assert_eq!(msg.to_chat().role, MessageRole::User);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
