//! Bounded tool-calling loop against a stateful Responses API.
//!
//! Each iteration submits one request. When the response asks for function
//! calls, every call is resolved through the caller's [`ToolHandler`] and the
//! outputs are sent back as the next input, chained to the previous response
//! by `previous_response_id`. The loop ends with the first response that
//! carries no function calls, or fails once the iteration budget is spent.
//! [`ToolCallLoop::run_stream`] does the same over streamed responses and
//! yields text deltas and tool call progress along the way.
//!
//! ```ignore
//! let tutor = ToolCallLoop::new(OpenAIResponsesProvider::from_env()?)
//!     .with_config_source(Arc::new(config_cache));
//! let outcome = tutor
//!     .run(vec![InputItem::user("What can I use this week?")], &handler, ToolLoopOptions::default())
//!     .await?;
//! ```

mod helpers;
mod streaming;
mod tool_execution;

#[cfg(test)]
mod test_utils;

use crate::config::{AgentConfigSource, AgentDefaults, RuntimeAgentConfig};
use crate::llm::{InputItem, Response, ResponseOutcome, ResponseRequest, ResponsesProvider};
use crate::tools::ToolHandler;
use crate::types::{ToolLoopError, ToolLoopOptions, ToolLoopOutcome};
use helpers::{compose_request, extract_function_calls, millis_to_u64};
use std::sync::Arc;
use std::time::Instant;
use tool_execution::execute_tool_calls;
use tracing::{debug, info, warn};

/// Drives one conversation turn through as many tool calls as the model needs.
pub struct ToolCallLoop<P> {
    provider: Arc<P>,
    config: Arc<dyn AgentConfigSource>,
}

impl<P> Clone for ToolCallLoop<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: ResponsesProvider> ToolCallLoop<P> {
    /// Loop over `provider` using the built-in agent defaults.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            config: Arc::new(RuntimeAgentConfig::from_defaults(&AgentDefaults::default())),
        }
    }

    /// Read model, instructions and tools from `config` on every request.
    #[must_use]
    pub fn with_config_source(mut self, config: Arc<dyn AgentConfigSource>) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run the loop until the model answers without function calls.
    ///
    /// At most `options.max_iterations()` requests are sent. The handler is
    /// called once per function call; calls of the same response run
    /// concurrently and their outputs are submitted in call order.
    ///
    /// # Errors
    /// - [`ToolLoopError::ToolHandler`] if the handler fails; no further
    ///   request is sent.
    /// - [`ToolLoopError::DidNotConverge`] if every response up to the budget
    ///   requested more tool calls.
    /// - [`ToolLoopError::MalformedResponse`] if a response lacks its `id`, a
    ///   function call lacks `call_id` or `name`, or the final response has no
    ///   text.
    /// - Provider failures and non-success outcomes, unretried.
    pub async fn run<H>(
        &self,
        initial_input: Vec<InputItem>,
        tool_handler: &H,
        options: ToolLoopOptions,
    ) -> Result<ToolLoopOutcome, ToolLoopError>
    where
        H: ToolHandler + ?Sized,
    {
        let max_iterations = options.max_iterations();
        let start = Instant::now();
        let mut input = initial_input;
        let mut cursor = options.previous_response_id.clone();
        let mut last_response_id = None;

        for iteration in 1..=max_iterations {
            let config = self.config.current().await;
            let request = compose_request(input, cursor.take(), iteration, &options, &config);
            debug!(
                iteration,
                model = %request.model,
                input_items = request.input.len(),
                chained = request.previous_response_id.is_some(),
                "Submitting tool loop request"
            );

            let response = self.submit(request).await?;
            let response_id = response.id.clone();

            let calls = extract_function_calls(&response)?;
            if calls.is_empty() {
                return finish(response, iteration, start);
            }

            let Some(response_id) = response_id else {
                return Err(ToolLoopError::malformed(
                    "response with function calls has no id",
                ));
            };

            debug!(
                iteration,
                response_id = %response_id,
                tool_calls = calls.len(),
                "Executing tool calls"
            );
            let outputs = execute_tool_calls(tool_handler, calls).await?;

            input = outputs.into_iter().map(InputItem::from).collect();
            cursor = Some(response_id.clone());
            last_response_id = Some(response_id);
        }

        warn!(
            max_iterations,
            last_response_id = last_response_id.as_deref().unwrap_or_default(),
            "Tool loop did not converge"
        );
        Err(ToolLoopError::DidNotConverge {
            max_iterations,
            last_response_id,
        })
    }

    async fn submit(&self, request: ResponseRequest) -> Result<Response, ToolLoopError> {
        match self.provider.create(request).await {
            Ok(ResponseOutcome::Success(response)) => Ok(response),
            Ok(ResponseOutcome::RateLimited) => Err(ToolLoopError::RateLimited),
            Ok(ResponseOutcome::InvalidRequest(body)) => Err(ToolLoopError::InvalidRequest(body)),
            Ok(ResponseOutcome::ServerError(body)) => Err(ToolLoopError::ServerError(body)),
            Err(e) => Err(ToolLoopError::Provider(e)),
        }
    }
}

fn finish(
    response: Response,
    iterations: usize,
    start: Instant,
) -> Result<ToolLoopOutcome, ToolLoopError> {
    let Some(response_id) = response.id.clone() else {
        return Err(ToolLoopError::malformed("final response has no id"));
    };
    let Some(text) = response.text() else {
        return Err(ToolLoopError::malformed("final response has no text"));
    };

    info!(
        response_id = %response_id,
        iterations,
        duration_ms = millis_to_u64(start.elapsed().as_millis()),
        "Tool loop converged"
    );

    Ok(ToolLoopOutcome {
        text,
        response_id,
        iterations,
        response,
    })
}
