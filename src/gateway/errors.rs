//! LLM gateway error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The endpoint could not be reached at all.
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The provider returned a non-success HTTP status.
    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to parse {provider} response: {reason}")]
    MalformedResponse { provider: String, reason: String },

    /// A chat was attempted on a provider with no credential. Providers
    /// are constructed without complaint on a blank key; this surfaces
    /// only when a call is actually made.
    #[error("{provider} API key is not configured")]
    MissingCredential { provider: String },

    /// Gateway configuration error.
    #[error("config error: {reason}")]
    Config { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_the_provider() {
        let err = GatewayError::MissingCredential {
            provider: "OpenAI".into(),
        };
        assert_eq!(err.to_string(), "OpenAI API key is not configured");
    }
}
