//! Protocol codec — framing, parsing, and error classification.
//!
//! Messages are newline-delimited JSON (one object per line). A line that
//! fails to parse is a *local* parse error, never a protocol-level error
//! from the server. Classification of unstructured failure text uses an
//! explicit, ordered substring table rather than inline string checks.

use serde::Serialize;
use thiserror::Error;

use super::types::{RpcError, RpcRequest, RpcResponse};

// ─── Classified Protocol Errors ─────────────────────────────────────────────

/// HTTP-style status codes used by the classification table.
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// Message used when a failure carries no message at all.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Ordered (pattern, code) classification table. Matching is
/// case-insensitive substring search; the first hit wins.
const CLASSIFICATION_TABLE: &[(&str, u16)] = &[
    ("not found", status::NOT_FOUND),
    ("unauthorized", status::UNAUTHORIZED),
    ("permission", status::FORBIDDEN),
    ("forbidden", status::FORBIDDEN),
    ("invalid", status::BAD_REQUEST),
    ("required", status::BAD_REQUEST),
];

/// A classified protocol error: code + message + the call site that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("[{code}] {message} (context: {context})")]
pub struct ProtocolError {
    pub code: u16,
    pub message: String,
    pub context: String,
}

/// The raw failure handed to [`classify`].
#[derive(Debug, Clone)]
pub enum Failure {
    /// Already-structured `{code, message}` — passes through unchanged.
    Structured { code: u16, message: String },
    /// Unstructured exception/message text.
    Text(String),
}

/// Classify a failure into a [`ProtocolError`].
///
/// A structured failure passes through with its code and message intact
/// (classifying an already-classified error again yields the identical
/// value). Unstructured text is matched against the ordered table; an
/// absent failure yields 500 with [`UNKNOWN_ERROR_MESSAGE`].
pub fn classify(failure: Option<Failure>, context: &str) -> ProtocolError {
    match failure {
        Some(Failure::Structured { code, message }) => ProtocolError {
            code,
            message,
            context: context.to_string(),
        },
        Some(Failure::Text(message)) => {
            let lower = message.to_lowercase();
            let code = CLASSIFICATION_TABLE
                .iter()
                .find(|(pattern, _)| lower.contains(pattern))
                .map(|(_, code)| *code)
                .unwrap_or(status::INTERNAL_SERVER_ERROR);
            ProtocolError {
                code,
                message,
                context: context.to_string(),
            }
        }
        None => ProtocolError {
            code: status::INTERNAL_SERVER_ERROR,
            message: UNKNOWN_ERROR_MESSAGE.to_string(),
            context: context.to_string(),
        },
    }
}

impl ProtocolError {
    /// Re-classify — idempotent by construction.
    pub fn reclassified(self) -> Self {
        let context = self.context.clone();
        classify(
            Some(Failure::Structured {
                code: self.code,
                message: self.message,
            }),
            &context,
        )
    }
}

impl From<RpcError> for Failure {
    fn from(err: RpcError) -> Self {
        // JSON-RPC codes are negative and server-defined; classification
        // keys off the message text, so treat them as unstructured unless
        // the server already speaks HTTP-style codes.
        if (100..=599).contains(&err.code) {
            Failure::Structured {
                code: err.code as u16,
                message: err.message,
            }
        } else {
            Failure::Text(err.message)
        }
    }
}

// ─── Framing ────────────────────────────────────────────────────────────────

/// A decode failure — the line was not a valid JSON-RPC response.
#[derive(Debug, Error)]
#[error("parse error: {reason}")]
pub struct DecodeError {
    pub reason: String,
    /// The offending line, retained for diagnostics.
    pub line: String,
}

/// Frame a request as one newline-terminated JSON line.
pub fn encode_request(
    id: u64,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(&RpcRequest::new(id, method, params))?;
    line.push('\n');
    Ok(line)
}

/// Frame a notification (no id, no response expected).
pub fn encode_notification(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<String, serde_json::Error> {
    let notification = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    });
    let mut line = serde_json::to_string(&notification)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line into an [`RpcResponse`].
pub fn decode_response(line: &str) -> Result<RpcResponse, DecodeError> {
    serde_json::from_str(line.trim()).map_err(|e| DecodeError {
        reason: e.to_string(),
        line: line.to_string(),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_is_newline_framed() {
        let line = encode_request(7, "tools/list", None).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"id\":7"));
    }

    #[test]
    fn decode_valid_response() {
        let resp = decode_response(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert_eq!(resp.id, 3);
    }

    #[test]
    fn decode_garbage_is_local_parse_error() {
        let err = decode_response("npx installed 12 packages").unwrap_err();
        assert!(err.line.contains("npx"));
    }

    #[test]
    fn structured_error_passes_through_unchanged() {
        let first = classify(
            Some(Failure::Structured {
                code: 418,
                message: "teapot".into(),
            }),
            "tests",
        );
        let second = first.clone().reclassified();
        assert_eq!(first, second);
        assert_eq!(second.code, 418);
        assert_eq!(second.message, "teapot");
    }

    #[test]
    fn classification_table_entries() {
        let cases = [
            ("The document was not found on the server", status::NOT_FOUND),
            ("Unauthorized: token expired", status::UNAUTHORIZED),
            ("you lack permission to access this path", status::FORBIDDEN),
            ("Forbidden resource", status::FORBIDDEN),
            ("Invalid parameter: id is required", status::BAD_REQUEST),
            ("the field name is required", status::BAD_REQUEST),
        ];
        for (message, expected) in cases {
            let err = classify(Some(Failure::Text(message.into())), "tests");
            assert_eq!(err.code, expected, "message: {message}");
            assert_eq!(err.message, message);
        }
    }

    #[test]
    fn unclassified_message_is_500_with_original_text() {
        let err = classify(Some(Failure::Text("disk exploded".into())), "tests");
        assert_eq!(err.code, status::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "disk exploded");
    }

    #[test]
    fn absent_error_is_500_unknown() {
        let err = classify(None, "tests");
        assert_eq!(err.code, status::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, UNKNOWN_ERROR_MESSAGE);
    }

    #[test]
    fn table_order_not_found_beats_invalid() {
        // "invalid path not found" matches both patterns; "not found" is
        // earlier in the table so 404 wins.
        let err = classify(Some(Failure::Text("invalid path not found".into())), "tests");
        assert_eq!(err.code, status::NOT_FOUND);
    }

    #[test]
    fn classification_attaches_context() {
        let err = classify(Some(Failure::Text("boom".into())), "supervisor.call_tool");
        assert_eq!(err.context, "supervisor.call_tool");
    }

    #[test]
    fn rpc_error_with_jsonrpc_code_classifies_by_message() {
        let failure: Failure = RpcError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        }
        .into();
        let err = classify(Some(failure), "tests");
        assert_eq!(err.code, status::NOT_FOUND);
    }

    #[test]
    fn rpc_error_with_http_code_passes_through() {
        let failure: Failure = RpcError {
            code: 403,
            message: "nope".into(),
            data: None,
        }
        .into();
        let err = classify(Some(failure), "tests");
        assert_eq!(err.code, 403);
        assert_eq!(err.message, "nope");
    }
}
