//! Response extraction — pull structured JSON out of tool-server prose.
//!
//! Tool servers are free to wrap their payload in explanatory text
//! ("Here are the results: {...}. Let me know..."), so extraction scans
//! for the first balanced JSON object or array anywhere in the text.
//! The scan is quote-aware: brackets inside string literals never count
//! toward nesting depth.

use thiserror::Error;

use crate::toolserver::ResultEnvelope;

/// Extraction failure. Both variants retain the full original text so
/// callers can log or surface what the server actually said.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object or array found in response text")]
    NoJson { text: String },

    #[error("failed to parse extracted JSON: {reason}")]
    Parse { reason: String, text: String },
}

impl ExtractError {
    /// The original response text, whatever the failure.
    pub fn original_text(&self) -> &str {
        match self {
            ExtractError::NoJson { text } => text,
            ExtractError::Parse { text, .. } => text,
        }
    }
}

/// Extract the first balanced JSON value from an envelope's text items.
///
/// Text items are concatenated in order; link and other items do not
/// participate.
pub fn extract_from_envelope(envelope: &ResultEnvelope) -> Result<serde_json::Value, ExtractError> {
    extract_json(&envelope.joined_text())
}

/// Scan `text` for the first balanced `{...}` or `[...]` span that
/// parses as JSON.
///
/// A balanced span that fails to parse (e.g. `{braces}` in prose) is
/// skipped and the scan continues; the first parse failure is reported
/// only if nothing later succeeds.
pub fn extract_json(text: &str) -> Result<serde_json::Value, ExtractError> {
    let mut search_from = 0;
    let mut first_failure: Option<String> = None;

    while let Some(rel) = text[search_from..].find(['{', '[']) {
        let start = search_from + rel;
        match balanced_span(text, start) {
            Some(end) => {
                let candidate = &text[start..end];
                match serde_json::from_str(candidate) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        if first_failure.is_none() {
                            first_failure = Some(e.to_string());
                        }
                        search_from = start + 1;
                    }
                }
            }
            None => {
                // Unterminated from this opener; try the next one.
                search_from = start + 1;
            }
        }
    }

    match first_failure {
        Some(reason) => Err(ExtractError::Parse {
            reason,
            text: text.to_string(),
        }),
        None => Err(ExtractError::NoJson {
            text: text.to_string(),
        }),
    }
}

/// Find the end (exclusive byte offset) of the bracket span opening at
/// `start`. Tracks string literals and escapes so quoted brackets are
/// ignored. Returns `None` if the span never closes.
fn balanced_span(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = match open {
        b'{' => b'}',
        b'[' => b']',
        _ => return None,
    };

    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
    }
    None
}

// ─── Tests ──────────────────────────────────────────────────────────────────
