//! Gateway configuration.

use serde::{Deserialize, Serialize};

/// Which provider backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible endpoint on this machine (Ollama, LM Studio).
    #[default]
    Local,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

/// Configuration for one provider instance.
///
/// A blank or absent `api_key` is valid: the provider is constructed in
/// a degraded state and reports why via its readiness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Endpoint override. The local provider's inference address, or a
    /// proxy/regional endpoint in front of a cloud provider.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Organization header for providers that support one (OpenAI).
    #[serde(default)]
    pub organization: Option<String>,
    /// Default model for chat requests that do not name one.
    #[serde(default)]
    pub model: Option<String>,
    /// Default sampling temperature for requests that do not set one.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Default completion-token cap for requests that do not set one.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl GatewayConfig {
    /// The configured key with surrounding whitespace stripped; `None`
    /// when absent or effectively blank.
    pub fn trimmed_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_provider() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.provider, ProviderKind::Local);
        assert!(config.api_key.is_none());
        assert!(config.organization.is_none());
        assert!(config.temperature.is_none());
        assert!(config.max_tokens.is_none());
    }

    #[test]
    fn sampling_defaults_deserialize() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"provider": "openai", "temperature": 0.3, "max_tokens": 512}"#,
        )
        .unwrap();
        assert_eq!(config.temperature, Some(0.3));
        assert_eq!(config.max_tokens, Some(512));
    }

    #[test]
    fn blank_key_is_treated_as_absent() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"provider": "openai", "api_key": "   "}"#).unwrap();
        assert!(config.trimmed_key().is_none());
    }

    #[test]
    fn key_is_trimmed() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"provider": "anthropic", "api_key": " sk-abc "}"#).unwrap();
        assert_eq!(config.trimmed_key().as_deref(), Some("sk-abc"));
    }
}
