//! LLM gateway — a single trait over local and cloud chat providers.
//!
//! Providers are constructed infallibly: a blank or missing API key
//! never prevents construction. Instead the provider reports a degraded
//! readiness, returns an empty model list, and fails chat calls with a
//! credential error only when one is actually attempted. Credentials
//! can be swapped at runtime without rebuilding the provider.

pub mod anthropic;
pub mod config;
pub mod errors;
pub mod local;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use config::{GatewayConfig, ProviderKind};
pub use errors::GatewayError;
pub use local::LocalProvider;
pub use openai::OpenAiProvider;

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for chat calls.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Short timeout for availability probes.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// ─── Shared chat types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Model override; the provider's configured default applies when
    /// absent.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Fill unset sampling fields from the provider's configured
    /// defaults. Explicit per-request values win.
    pub fn with_sampling_defaults(
        mut self,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Self {
        self.temperature = self.temperature.or(temperature);
        self.max_tokens = self.max_tokens.or(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Whether a provider can currently serve chat requests, and why not.
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Readiness {
    pub fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            ready: false,
            reason: Some(reason.into()),
        }
    }
}

// ─── Provider trait ─────────────────────────────────────────────────────────

/// The interface every chat provider implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name ("Local", "OpenAI", "Anthropic").
    fn name(&self) -> &str;

    /// Send a chat request and await the full response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// Quick boolean availability check. For local providers this probes
    /// the endpoint; for cloud providers it reflects credential presence.
    async fn is_available(&self) -> bool;

    /// Models this provider can serve right now. Empty (not an error)
    /// when the provider has no credential.
    async fn available_models(&self) -> Result<Vec<String>, GatewayError>;

    /// Readiness with an explanation when degraded.
    async fn service_readiness(&self) -> Readiness;

    /// Replace the provider's credential at runtime. Takes effect for
    /// calls issued after this returns; in-flight calls keep the
    /// credential they started with.
    async fn update_credential(&self, credential: &str);
}

/// Build a provider from configuration. Never fails: a missing key
/// yields a degraded provider, not an error.
pub fn build_provider(config: &GatewayConfig) -> Arc<dyn LlmProvider> {
    match config.provider {
        ProviderKind::Local => Arc::new(LocalProvider::new(config)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)),
    }
}

/// Shared HTTP client construction with the gateway timeouts. Falls back
/// to default settings if the builder is rejected by the platform.
pub(crate) fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_defaults_never_override_explicit_values() {
        let request = ChatRequest {
            temperature: Some(0.9),
            ..Default::default()
        }
        .with_sampling_defaults(Some(0.1), Some(256));
        assert_eq!(request.temperature, Some(0.9));
        assert_eq!(request.max_tokens, Some(256));
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = ChatMessage::system("be terse");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"system\""));
    }

    #[tokio::test]
    async fn factory_never_fails_on_blank_key() {
        for provider in ["openai", "anthropic"] {
            let config: GatewayConfig = serde_json::from_str(&format!(
                r#"{{"provider": "{provider}", "api_key": ""}}"#
            ))
            .unwrap();
            let built = build_provider(&config);
            let readiness = built.service_readiness().await;
            assert!(!readiness.ready);
            assert!(readiness
                .reason
                .unwrap()
                .contains("API key is not configured"));
        }
    }

    #[tokio::test]
    async fn blank_key_provider_has_empty_model_list() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"provider": "anthropic"}"#).unwrap();
        let provider = build_provider(&config);
        assert!(provider.available_models().await.unwrap().is_empty());
        assert!(!provider.is_available().await);
    }
}
