//! Local OpenAI-compatible provider (Ollama, LM Studio, llama.cpp).
//!
//! No credential is required by default, but some local servers accept a
//! bearer token; `update_credential` installs one. Availability is a
//! live probe of the endpoint rather than a credential check.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::openai::{build_body, fold_reply, ChatCompletionReply};
use super::{
    build_http_client, ChatRequest, ChatResponse, GatewayConfig, GatewayError, LlmProvider,
    Readiness, PROBE_TIMEOUT,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub struct LocalProvider {
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    api_key: RwLock<Option<String>>,
    http: reqwest::Client,
}

impl LocalProvider {
    pub fn new(config: &GatewayConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: RwLock::new(config.trimmed_key()),
            http: build_http_client(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn probe_models(&self) -> Result<Vec<String>, GatewayError> {
        let mut req = self.http.get(self.models_url()).timeout(PROBE_TIMEOUT);
        if let Some(key) = self.api_key.read().await.as_deref() {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| GatewayError::ConnectionFailed {
            endpoint: self.models_url(),
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

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse {
                provider: self.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        "Local"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let request = request.with_sampling_defaults(self.temperature, self.max_tokens);
        let body = build_body(&request, &self.model);
        let mut req = self.http.post(self.chat_url()).json(&body);
        if let Some(key) = self.api_key.read().await.as_deref() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| GatewayError::ConnectionFailed {
            endpoint: self.chat_url(),
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
        self.probe_models().await.is_ok()
    }

    async fn available_models(&self) -> Result<Vec<String>, GatewayError> {
        self.probe_models().await
    }

    async fn service_readiness(&self) -> Readiness {
        match self.probe_models().await {
            Ok(_) => Readiness::ready(),
            Err(e) => Readiness::not_ready(format!(
                "local endpoint {} is unreachable: {e}",
                self.base_url
            )),
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
