//! Core types for the tool-call loop.
//!
//! - [`ToolLoopOptions`]: Per-run configuration of the loop
//! - [`ToolLoopOutcome`]: Final answer and conversation cursor
//! - [`ToolLoopEvent`]: Progress of a streamed run
//! - [`ToolLoopError`]: Why a run failed

use crate::llm::{Response, ToolDefinition};
use serde_json::Value;
use std::collections::BTreeMap;

/// Iteration budget used when none is configured.
pub const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Options for a single [`ToolCallLoop::run`](crate::ToolCallLoop::run).
///
/// Unset fields fall back to the runtime agent configuration.
#[derive(Clone, Debug, Default)]
pub struct ToolLoopOptions {
    /// Model identifier
    pub model: Option<String>,
    /// Replaces the configured instructions
    pub instructions: Option<String>,
    /// Appended to the instructions after a blank line
    pub extra_instructions: Option<String>,
    /// Replaces the configured tool list
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<Value>,
    pub parallel_tool_calls: Option<bool>,
    /// Output text configuration (structured output formats)
    pub text: Option<Value>,
    /// Extra request metadata
    pub metadata: BTreeMap<String, String>,
    /// Cursor of an earlier conversation to continue from
    pub previous_response_id: Option<String>,
    /// Request budget; `None` or zero means [`DEFAULT_MAX_ITERATIONS`]
    pub max_iterations: Option<usize>,
}

impl ToolLoopOptions {
    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }
}

/// Result of a converged loop.
#[derive(Clone, Debug)]
pub struct ToolLoopOutcome {
    /// Final answer text, exactly as the service produced it
    pub text: String,
    /// Cursor of the final response, for continuing the conversation
    pub response_id: String,
    /// Number of requests sent
    pub iterations: usize,
    /// The final response
    pub response: Response,
}

/// Progress of [`ToolCallLoop::run_stream`](crate::ToolCallLoop::run_stream).
#[derive(Clone, Debug)]
pub enum ToolLoopEvent {
    /// A request was accepted; `response_id` is its cursor.
    ResponseCreated {
        response_id: String,
        iteration: usize,
    },
    /// A fragment of answer text.
    TextDelta(String),
    /// The model asked for a tool call.
    ToolCallStarted { call_id: String, name: String },
    /// The tool call was answered.
    ToolCallCompleted { call_id: String, name: String },
    /// The loop converged. Always the last event of a successful run.
    Completed(ToolLoopOutcome),
}

/// Why a tool-call loop stopped without an answer.
///
/// None of these are retried by the loop.
#[derive(Debug)]
pub enum ToolLoopError {
    /// The tool handler failed; the loop was aborted.
    ToolHandler {
        call_id: String,
        name: String,
        source: anyhow::Error,
    },
    /// Every response up to the budget asked for more tool calls.
    DidNotConverge {
        max_iterations: usize,
        last_response_id: Option<String>,
    },
    /// The response lacked fields the loop needs.
    MalformedResponse(String),
    /// The provider could not complete the request.
    Provider(anyhow::Error),
    RateLimited,
    InvalidRequest(String),
    ServerError(String),
}

impl ToolLoopError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Whether a caller-level retry of the whole run could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError(_) | Self::Provider(_))
    }
}

impl std::fmt::Display for ToolLoopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Verbatim handler message.
            Self::ToolHandler { source, .. } => write!(f, "{source}"),
            Self::DidNotConverge {
                max_iterations, ..
            } => write!(
                f,
                "tool loop did not converge after {max_iterations} iterations"
            ),
            Self::MalformedResponse(message) => write!(f, "malformed response: {message}"),
            Self::Provider(e) => write!(f, "provider error: {e}"),
            Self::RateLimited => write!(f, "rate limited by completion service"),
            Self::InvalidRequest(body) => write!(f, "invalid request: {body}"),
            Self::ServerError(body) => write!(f, "completion service error: {body}"),
        }
    }
}

impl std::error::Error for ToolLoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ToolHandler { source, .. } | Self::Provider(source) => Some(&**source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_iterations_default_and_zero() {
        let mut options = ToolLoopOptions::default();
        assert_eq!(options.max_iterations(), DEFAULT_MAX_ITERATIONS);
        options.max_iterations = Some(0);
        assert_eq!(options.max_iterations(), DEFAULT_MAX_ITERATIONS);
        options.max_iterations = Some(3);
        assert_eq!(options.max_iterations(), 3);
    }

    #[test]
    fn test_tool_handler_error_displays_source_verbatim() {
        let error = ToolLoopError::ToolHandler {
            call_id: "call_1".to_owned(),
            name: "execute_sql_query".to_owned(),
            source: anyhow::anyhow!("sandbox unavailable"),
        };
        assert_eq!(error.to_string(), "sandbox unavailable");
        assert!(!error.is_transient());
    }

    #[test]
    fn test_did_not_converge_message() {
        let error = ToolLoopError::DidNotConverge {
            max_iterations: 4,
            last_response_id: Some("resp_4".to_owned()),
        };
        assert!(error.to_string().contains("did not converge"));
    }
}
