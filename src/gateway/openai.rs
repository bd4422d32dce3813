//! OpenAI provider, plus the OpenAI-compatible wire types shared with
//! the local provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    build_http_client, ChatRequest, ChatResponse, GatewayConfig, GatewayError, LlmProvider,
    Readiness, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Resolve the chat-completions endpoint, honoring a configured
/// base-URL override (proxy, Azure-style gateway).
fn chat_endpoint(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
    format!("{base}/chat/completions")
}

/// Chat models this provider is known to serve.
const KNOWN_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"];

// ─── Wire types (OpenAI-compatible) ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionBody {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionReply {
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChoice {
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

pub(crate) fn build_body(request: &ChatRequest, default_model: &str) -> ChatCompletionBody {
    ChatCompletionBody {
        model: request
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: false,
    }
}

pub(crate) fn fold_reply(
    reply: ChatCompletionReply,
    fallback_model: &str,
    provider: &str,
) -> Result<ChatResponse, GatewayError> {
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::MalformedResponse {
            provider: provider.to_string(),
            reason: "response contained no choices".into(),
        })?;
    Ok(ChatResponse {
        content: choice.message.content,
        model: reply.model.unwrap_or_else(|| fallback_model.to_string()),
        usage: reply.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
        finish_reason: choice.finish_reason,
    })
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// OpenAI chat provider. Construction accepts a blank key; such a
/// provider reports degraded readiness and fails only when chat is
/// actually called.
pub struct OpenAiProvider {
    endpoint: String,
    model: String,
    organization: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_key: RwLock<Option<String>>,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            endpoint: chat_endpoint(config.base_url.as_deref()),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            organization: config.organization.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: RwLock::new(config.trimmed_key()),
            http: build_http_client(),
        }
    }

    /// Credential snapshot taken at call start; a concurrent
    /// `update_credential` affects only later calls.
    async fn snapshot_key(&self) -> Option<String> {
        self.api_key.read().await.clone()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let key = self
            .snapshot_key()
            .await
            .ok_or_else(|| GatewayError::MissingCredential {
                provider: self.name().to_string(),
            })?;

        let request = request.with_sampling_defaults(self.temperature, self.max_tokens);
        let body = build_body(&request, &self.model);
        let mut builder = self.http.post(&self.endpoint).bearer_auth(&key).json(&body);
        if let Some(org) = self.organization.as_deref() {
            builder = builder.header("OpenAI-Organization", org);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                provider: self.name().to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let reply: ChatCompletionReply =
            response
                .json()
                .await
                .map_err(|e| GatewayError::MalformedResponse {
                    provider: self.name().to_string(),
                    reason: e.to_string(),
                })?;
        fold_reply(reply, &self.model, self.name())
    }

    async fn is_available(&self) -> bool {
        self.snapshot_key().await.is_some()
    }

    async fn available_models(&self) -> Result<Vec<String>, GatewayError> {
        if self.snapshot_key().await.is_none() {
            return Ok(Vec::new());
        }
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
    }

    async fn service_readiness(&self) -> Readiness {
        if self.snapshot_key().await.is_some() {
            Readiness::ready()
        } else {
            Readiness::not_ready(format!("{} API key is not configured", self.name()))
        }
    }

    async fn update_credential(&self, credential: &str) {
        let trimmed = credential.trim();
        let mut key = self.api_key.write().await;
        *key = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        tracing::info!(provider = self.name(), present = key.is_some(), "credential updated");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
