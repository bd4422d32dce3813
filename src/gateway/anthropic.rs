//! Anthropic provider.
//!
//! The Messages API differs from the OpenAI shape: system text rides in
//! a top-level `system` field, message content is a list of typed
//! blocks, and `max_tokens` is mandatory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    build_http_client, ChatRequest, ChatResponse, GatewayConfig, GatewayError, LlmProvider,
    MessageRole, Readiness, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Resolve the messages endpoint, honoring a configured base-URL
/// override.
fn messages_endpoint(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
    format!("{base}/messages")
}
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Chat models this provider is known to serve.
const KNOWN_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
];

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

fn build_body(request: &ChatRequest, default_model: &str) -> MessagesBody {
    // System messages are concatenated into the top-level system field.
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let messages = request
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| WireMessage {
            role: m.role.as_str().to_string(),
            content: vec![ContentBlock {
                block_type: "text".into(),
                text: m.content.clone(),
            }],
        })
        .collect();

    MessagesBody {
        model: request
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string()),
        messages,
        system: if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        },
        temperature: request.temperature,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    }
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// Anthropic chat provider. Like the other cloud provider, a blank key
/// degrades readiness instead of failing construction.
pub struct AnthropicProvider {
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_key: RwLock<Option<String>>,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            endpoint: messages_endpoint(config.base_url.as_deref()),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: RwLock::new(config.trimmed_key()),
            http: build_http_client(),
        }
    }

    async fn snapshot_key(&self) -> Option<String> {
        self.api_key.read().await.clone()
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
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
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
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

        let reply: MessagesReply =
            response
                .json()
                .await
                .map_err(|e| GatewayError::MalformedResponse {
                    provider: self.name().to_string(),
                    reason: e.to_string(),
                })?;

        let content = reply
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse {
            content,
            model: reply.model,
            usage: reply.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: reply.stop_reason,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChatMessage;

    fn provider(key: &str) -> AnthropicProvider {
        AnthropicProvider::new(
            &serde_json::from_value(serde_json::json!({
                "provider": "anthropic",
                "api_key": key,
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn blank_key_degrades_readiness() {
        let p = provider("");
        let readiness = p.service_readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Anthropic API key is not configured")
        );
        assert!(p.available_models().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_without_key_is_a_credential_error() {
        let p = provider("  ");
        let err = p.chat(ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn update_credential_takes_effect() {
        let p = provider("");
        p.update_credential("sk-ant-test").await;
        assert!(p.is_available().await);
        assert_eq!(p.available_models().await.unwrap().len(), KNOWN_MODELS.len());
    }

    #[test]
    fn system_messages_move_to_top_level_field() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("be helpful"),
                ChatMessage::system("be terse"),
                ChatMessage::user("hello"),
            ],
            model: None,
            temperature: None,
            max_tokens: None,
        };
        let body = build_body(&request, DEFAULT_MODEL);
        assert_eq!(body.system.as_deref(), Some("be helpful\n\nbe terse"));
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
        assert_eq!(body.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn base_url_override_redirects_the_endpoint() {
        assert_eq!(
            messages_endpoint(None),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            messages_endpoint(Some("https://gateway.corp.example/anthropic/")),
            "https://gateway.corp.example/anthropic/messages"
        );
    }

    #[test]
    fn configured_sampling_fills_unset_request_fields() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "provider": "anthropic",
            "api_key": "sk-ant-test",
            "temperature": 0.5,
            "max_tokens": 1024,
        }))
        .unwrap();
        let p = AnthropicProvider::new(&config);

        let request =
            ChatRequest::default().with_sampling_defaults(p.temperature, p.max_tokens);
        let body = build_body(&request, &p.model);
        assert_eq!(body.temperature, Some(0.5));
        assert_eq!(body.max_tokens, 1024);
    }

    #[test]
    fn content_rides_in_typed_blocks() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("ping")],
            ..Default::default()
        };
        let body = build_body(&request, DEFAULT_MODEL);
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""text":"ping""#));
    }
}
