//! The orchestration loop: model rounds interleaved with tool calls.
//!
//! Each round sends the conversation to the provider, scans the reply
//! for tool directives, executes them left to right, and feeds the
//! results back as the next round's input. A turn ends when a reply
//! contains no directives, or when the round budget runs out.

use std::sync::Arc;

use crate::extract::extract_from_envelope;
use crate::gateway::{ChatMessage, ChatRequest, GatewayError, LlmProvider};
use crate::toolserver::{ToolCallOutcome, ToolServerSupervisor};

use super::directive::{format_results_block, scan_directives, strip_directives, Directive};
use super::types::{ConversationMessage, TurnOutcome};

/// Tool rounds allowed per turn.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    supervisor: Arc<ToolServerSupervisor>,
    max_rounds: usize,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, supervisor: Arc<ToolServerSupervisor>) -> Self {
        Self {
            provider,
            supervisor,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    /// Run one full turn over the given history.
    ///
    /// Tool failures never abort the turn: a failed call is reported to
    /// the model inside the results block, and the model decides how to
    /// proceed. Only a provider error ends the turn early.
    pub async fn run_turn(
        &self,
        history: &[ConversationMessage],
    ) -> Result<TurnOutcome, GatewayError> {
        let mut conversation: Vec<ChatMessage> =
            history.iter().map(ConversationMessage::to_chat).collect();
        let mut tool_results: Vec<ToolCallOutcome> = Vec::new();
        let mut analysis = String::new();
        let mut last_text = String::new();

        for round in 1..=self.max_rounds {
            let response = self
                .provider
                .chat(ChatRequest {
                    messages: conversation.clone(),
                    ..Default::default()
                })
                .await?;
            let text = response.content;

            let directives = scan_directives(&text);
            if directives.is_empty() {
                tracing::debug!(round, "turn complete");
                return Ok(TurnOutcome {
                    analysis,
                    tool_results,
                    final_response: text,
                });
            }

            if analysis.is_empty() {
                analysis = strip_directives(&text).trim().to_string();
            }

            tracing::debug!(round, count = directives.len(), "executing tool directives");
            let mut outcomes = Vec::with_capacity(directives.len());
            for directive in directives {
                let outcome = match directive {
                    Directive::Call(d) => {
                        let raw = self
                            .supervisor
                            .execute_tool(&d.server, &d.tool, d.arguments, None)
                            .await;
                        extract_payload(raw)
                    }
                    Directive::Malformed { body, reason } => {
                        tracing::warn!(%body, %reason, "malformed tool directive");
                        malformed_outcome(reason)
                    }
                };
                outcomes.push(outcome);
            }

            conversation.push(ChatMessage::assistant(text.clone()));
            conversation.push(ChatMessage::user(format_results_block(&outcomes)));
            tool_results.extend(outcomes);
            last_text = text;
        }

        tracing::warn!(
            max_rounds = self.max_rounds,
            "round budget exhausted, returning partial response"
        );
        let mut final_response = strip_directives(&last_text).trim().to_string();
        if final_response.is_empty() {
            final_response =
                "The request could not be completed within the tool round limit.".to_string();
        }
        Ok(TurnOutcome {
            analysis,
            tool_results,
            final_response,
        })
    }
}

/// Run a successful call's envelope through the response extractor.
///
/// A reply the extractor cannot make sense of is downgraded to a failed
/// result carrying the extraction error, so the model sees what went
/// wrong instead of an opaque success. Failed calls pass through
/// untouched.
fn extract_payload(mut outcome: ToolCallOutcome) -> ToolCallOutcome {
    if !outcome.success {
        return outcome;
    }
    let Some(envelope) = outcome.envelope.as_ref() else {
        return outcome;
    };
    match extract_from_envelope(envelope) {
        Ok(value) => outcome.payload = Some(value),
        Err(e) => {
            tracing::warn!(
                server = %outcome.server,
                tool = %outcome.tool_name,
                error = %e,
                "tool reply carried no extractable payload"
            );
            outcome.success = false;
            outcome.error = Some(format!("tool reply had no structured payload: {e}"));
        }
    }
    outcome
}

fn malformed_outcome(reason: String) -> ToolCallOutcome {
    ToolCallOutcome {
        server: "unknown".into(),
        tool_name: "unknown".into(),
        success: false,
        envelope: None,
        payload: None,
        error: Some(format!("malformed tool directive: {reason}")),
        execution_time_ms: 0,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
