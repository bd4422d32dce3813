//! Tool-directive scanning.
//!
//! The model requests tool calls by embedding marker-delimited blocks
//! in its text:
//!
//! ```text
//! <|tool_query|>{"server": "docs", "tool": "docs.search", "arguments": {"q": "rust"}}<|/tool_query|>
//! ```
//!
//! Scanning is pure text processing: find each open/close marker pair
//! left to right, parse the body as JSON. Blocks never nest; an open
//! marker without a close is ignored. Results are fed back to the model
//! wrapped in result markers.

use serde::Deserialize;

use crate::toolserver::ToolCallOutcome;

pub const QUERY_OPEN: &str = "<|tool_query|>";
pub const QUERY_CLOSE: &str = "<|/tool_query|>";
pub const RESULTS_OPEN: &str = "<|tool_results|>";
pub const RESULTS_CLOSE: &str = "<|/tool_results|>";

/// A parsed tool directive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolDirective {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One scanned block: a well-formed directive, or the body of a block
/// whose JSON did not parse (reported back to the model as a failure).
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Call(ToolDirective),
    Malformed { body: String, reason: String },
}

/// Scan `text` for directive blocks, left to right.
///
/// An unterminated open marker ends the scan; everything before it is
/// still returned.
pub fn scan_directives(text: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find(QUERY_OPEN) {
        let body_start = search_from + rel + QUERY_OPEN.len();
        let Some(rel_close) = text[body_start..].find(QUERY_CLOSE) else {
            break;
        };
        let body = text[body_start..body_start + rel_close].trim();
        match serde_json::from_str::<ToolDirective>(body) {
            Ok(directive) => directives.push(Directive::Call(directive)),
            Err(e) => directives.push(Directive::Malformed {
                body: body.to_string(),
                reason: e.to_string(),
            }),
        }
        search_from = body_start + rel_close + QUERY_CLOSE.len();
    }

    directives
}

/// True if `text` contains at least one complete directive block.
pub fn contains_directive(text: &str) -> bool {
    match text.find(QUERY_OPEN) {
        Some(pos) => text[pos..].contains(QUERY_CLOSE),
        None => false,
    }
}

/// Remove every directive block from `text`, keeping the surrounding
/// prose.
pub fn strip_directives(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find(QUERY_OPEN) {
        let open = search_from + rel;
        out.push_str(&text[search_from..open]);
        let body_start = open + QUERY_OPEN.len();
        match text[body_start..].find(QUERY_CLOSE) {
            Some(rel_close) => {
                search_from = body_start + rel_close + QUERY_CLOSE.len();
            }
            None => {
                // Unterminated block is kept verbatim.
                search_from = open;
                break;
            }
        }
    }
    out.push_str(&text[search_from..]);
    out
}

/// Format executed tool results as a marker-delimited block for the
/// next model round.
pub fn format_results_block(outcomes: &[ToolCallOutcome]) -> String {
    let payload = serde_json::to_string(outcomes).unwrap_or_else(|_| "[]".to_string());
    format!("{RESULTS_OPEN}\n{payload}\n{RESULTS_CLOSE}")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(server: &str, tool: &str, arguments: serde_json::Value) -> Directive {
        Directive::Call(ToolDirective {
            server: server.into(),
            tool: tool.into(),
            arguments,
        })
    }

    #[test]
    fn single_directive_in_prose() {
        let text = r#"Let me check. <|tool_query|>{"server": "docs", "tool": "docs.search", "arguments": {"q": "rust"}}<|/tool_query|> One moment."#;
        let found = scan_directives(text);
        assert_eq!(
            found,
            vec![call("docs", "docs.search", serde_json::json!({"q": "rust"}))]
        );
    }

    #[test]
    fn multiple_directives_execute_left_to_right() {
        let text = concat!(
            r#"<|tool_query|>{"server": "a", "tool": "a.one"}<|/tool_query|>"#,
            " then ",
            r#"<|tool_query|>{"server": "b", "tool": "b.two"}<|/tool_query|>"#,
        );
        let found = scan_directives(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], call("a", "a.one", serde_json::Value::Null));
        assert_eq!(found[1], call("b", "b.two", serde_json::Value::Null));
    }

    #[test]
    fn malformed_body_is_reported_not_dropped() {
        let text = r#"<|tool_query|>{"server": oops}<|/tool_query|>"#;
        let found = scan_directives(text);
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0], Directive::Malformed { .. }));
    }

    #[test]
    fn unterminated_open_marker_is_ignored() {
        let text = r#"thinking <|tool_query|>{"server": "a", "tool": "a.one"}"#;
        assert!(scan_directives(text).is_empty());
        assert!(!contains_directive(text));
    }

    #[test]
    fn plain_text_has_no_directives() {
        assert!(scan_directives("just an answer").is_empty());
        assert!(!contains_directive("just an answer"));
    }

    #[test]
    fn strip_keeps_surrounding_prose() {
        let text = r#"Before. <|tool_query|>{"server": "a", "tool": "a.one"}<|/tool_query|> After."#;
        assert_eq!(strip_directives(text), "Before.  After.");
    }

    #[test]
    fn strip_keeps_unterminated_block_verbatim() {
        let text = "prose <|tool_query|>{\"server\"";
        assert_eq!(strip_directives(text), text);
    }

    #[test]
    fn results_block_is_marker_delimited_json() {
        let outcomes = vec![ToolCallOutcome {
            server: "docs".into(),
            tool_name: "docs.search".into(),
            success: true,
            envelope: None,
            payload: None,
            error: None,
            execution_time_ms: 12,
        }];
        let block = format_results_block(&outcomes);
        assert!(block.starts_with(RESULTS_OPEN));
        assert!(block.ends_with(RESULTS_CLOSE));
        assert!(block.contains("docs.search"));
    }
}
