use super::helpers::{compose_request, function_call_request};
use super::tool_execution::execute_tool_calls;
use super::{ToolCallLoop, finish};
use crate::llm::{InputItem, Response, ResponseStreamEvent, ResponsesProvider, ToolCallRequest};
use crate::tools::ToolHandler;
use crate::types::{ToolLoopError, ToolLoopEvent, ToolLoopOptions};
use futures::{Stream, StreamExt};
use std::time::Instant;
use tracing::{debug, warn};

impl<P: ResponsesProvider> ToolCallLoop<P> {
    /// Streaming variant of [`run`](Self::run).
    ///
    /// Requests are composed, chained and capped exactly as in `run`. Text
    /// deltas and tool call progress are yielded as they happen, and a
    /// successful run ends with [`ToolLoopEvent::Completed`]. A failure is
    /// yielded as the last item.
    pub fn run_stream<'a, H>(
        &'a self,
        initial_input: Vec<InputItem>,
        tool_handler: &'a H,
        options: ToolLoopOptions,
    ) -> impl Stream<Item = Result<ToolLoopEvent, ToolLoopError>> + 'a
    where
        H: ToolHandler + ?Sized,
    {
        async_stream::stream! {
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
                    "Submitting streamed tool loop request"
                );

                let mut turn = StreamedTurn::default();
                let mut events = self.provider.create_stream(request);
                while let Some(event) = events.next().await {
                    let applied = event
                        .map_err(ToolLoopError::Provider)
                        .and_then(|event| turn.apply(event, iteration));
                    match applied {
                        Ok(Some(event)) => {
                            yield Ok(event);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                if turn.calls.is_empty() {
                    yield finish(turn.into_response(), iteration, start).map(ToolLoopEvent::Completed);
                    return;
                }

                let response_id = match turn.response_id.take() {
                    Some(response_id) => response_id,
                    None => {
                        yield Err(ToolLoopError::malformed("response with function calls has no id"));
                        return;
                    }
                };

                let answered: Vec<(String, String)> = turn
                    .calls
                    .iter()
                    .map(|call| (call.call_id.clone(), call.name.clone()))
                    .collect();
                debug!(
                    iteration,
                    response_id = %response_id,
                    tool_calls = answered.len(),
                    "Executing streamed tool calls"
                );
                let outputs = match execute_tool_calls(tool_handler, turn.calls).await {
                    Ok(outputs) => outputs,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for (call_id, name) in answered {
                    yield Ok(ToolLoopEvent::ToolCallCompleted { call_id, name });
                }

                input = outputs.into_iter().map(InputItem::from).collect();
                cursor = Some(response_id.clone());
                last_response_id = Some(response_id);
            }

            warn!(
                max_iterations,
                last_response_id = last_response_id.as_deref().unwrap_or_default(),
                "Streamed tool loop did not converge"
            );
            yield Err(ToolLoopError::DidNotConverge {
                max_iterations,
                last_response_id,
            });
        }
    }
}

/// What one streamed response said so far.
///
/// Function calls come from `response.output_item.done` events only; the
/// cursor from `response.created`, overridden by `response.completed`.
#[derive(Debug, Default)]
struct StreamedTurn {
    response_id: Option<String>,
    text: String,
    saw_text: bool,
    calls: Vec<ToolCallRequest>,
    completed: Option<Response>,
}

impl StreamedTurn {
    fn apply(
        &mut self,
        event: ResponseStreamEvent,
        iteration: usize,
    ) -> Result<Option<ToolLoopEvent>, ToolLoopError> {
        match event {
            ResponseStreamEvent::Created { response_id } => {
                self.response_id = Some(response_id.clone());
                Ok(Some(ToolLoopEvent::ResponseCreated {
                    response_id,
                    iteration,
                }))
            }
            ResponseStreamEvent::OutputTextDelta { delta } => {
                self.saw_text = true;
                self.text.push_str(&delta);
                Ok(Some(ToolLoopEvent::TextDelta(delta)))
            }
            ResponseStreamEvent::OutputTextDone { text } => {
                self.saw_text = true;
                self.text = text;
                Ok(None)
            }
            ResponseStreamEvent::FunctionCallDone {
                call_id,
                name,
                arguments,
            } => {
                let call = function_call_request(call_id, name, &arguments)?;
                let started = ToolLoopEvent::ToolCallStarted {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                };
                self.calls.push(call);
                Ok(Some(started))
            }
            ResponseStreamEvent::Completed(response) => {
                if let Some(response_id) = &response.id {
                    self.response_id = Some(response_id.clone());
                }
                self.completed = Some(response);
                Ok(None)
            }
            ResponseStreamEvent::Error { status, message } => Err(stream_error(status, message)),
        }
    }

    /// The final response, with the streamed id and text filled in where the
    /// completed response lacks them.
    fn into_response(self) -> Response {
        let mut response = self.completed.unwrap_or_default();
        if response.id.is_none() {
            response.id = self.response_id;
        }
        if response.text().is_none() && self.saw_text {
            response.output_text = Some(self.text);
        }
        response
    }
}

fn stream_error(status: Option<u16>, message: String) -> ToolLoopError {
    match status {
        Some(429) => ToolLoopError::RateLimited,
        Some(status) if (400..500).contains(&status) => ToolLoopError::InvalidRequest(message),
        _ => ToolLoopError::ServerError(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OutputItem;
    use serde_json::json;

    #[test]
    fn test_stream_error_mapping() {
        assert!(matches!(stream_error(Some(429), String::new()), ToolLoopError::RateLimited));
        assert!(matches!(
            stream_error(Some(400), "bad".to_owned()),
            ToolLoopError::InvalidRequest(body) if body == "bad"
        ));
        assert!(matches!(
            stream_error(None, "overloaded".to_owned()),
            ToolLoopError::ServerError(body) if body == "overloaded"
        ));
    }

    #[test]
    fn test_turn_prefers_completed_response() -> anyhow::Result<()> {
        let mut turn = StreamedTurn::default();
        turn.apply(
            ResponseStreamEvent::Created {
                response_id: "resp_1".to_owned(),
            },
            1,
        )?;
        turn.apply(
            ResponseStreamEvent::OutputTextDelta {
                delta: "partial".to_owned(),
            },
            1,
        )?;
        turn.apply(
            ResponseStreamEvent::Completed(Response {
                id: Some("resp_1".to_owned()),
                output: vec![OutputItem::message("complete answer")],
                ..Response::default()
            }),
            1,
        )?;

        let response = turn.into_response();
        assert_eq!(response.text().as_deref(), Some("complete answer"));
        Ok(())
    }

    #[test]
    fn test_turn_falls_back_to_streamed_text() -> anyhow::Result<()> {
        let mut turn = StreamedTurn::default();
        turn.apply(
            ResponseStreamEvent::Created {
                response_id: "resp_1".to_owned(),
            },
            1,
        )?;
        turn.apply(
            ResponseStreamEvent::OutputTextDelta {
                delta: "SELECT ".to_owned(),
            },
            1,
        )?;
        turn.apply(
            ResponseStreamEvent::OutputTextDelta {
                delta: "1;".to_owned(),
            },
            1,
        )?;

        let response = turn.into_response();
        assert_eq!(response.id.as_deref(), Some("resp_1"));
        assert_eq!(response.text().as_deref(), Some("SELECT 1;"));
        Ok(())
    }

    #[test]
    fn test_turn_rejects_call_without_id() {
        let mut turn = StreamedTurn::default();
        let result = turn.apply(
            ResponseStreamEvent::FunctionCallDone {
                call_id: None,
                name: Some("get_database_schema".to_owned()),
                arguments: json!("{}"),
            },
            1,
        );
        assert!(matches!(result, Err(ToolLoopError::MalformedResponse(_))));
        assert!(turn.calls.is_empty());
    }
}
