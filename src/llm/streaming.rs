//! Streamed Responses API calls.
//!
//! A streamed `create` answers with server-sent events. [`SseDecoder`] splits
//! the byte stream into `data` payloads and [`parse_event`] keeps the events
//! the tool loop acts on as [`ResponseStreamEvent`]s.

use crate::llm::{OutputItem, Response, ResponseOutcome};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Events of one streamed response, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStreamEvent {
    /// The service accepted the request. `response_id` is the new cursor.
    Created { response_id: String },
    /// A fragment of answer text.
    OutputTextDelta { delta: String },
    /// The complete text of an answer part.
    OutputTextDone { text: String },
    /// A function call output item is complete.
    FunctionCallDone {
        call_id: Option<String>,
        name: Option<String>,
        arguments: Value,
    },
    /// The final response object.
    Completed(Response),
    /// The service rejected the request or aborted the response.
    Error {
        /// HTTP status, when the request itself was rejected
        status: Option<u16>,
        message: String,
    },
}

/// Boxed stream of response events.
pub type ResponseStream<'a> =
    Pin<Box<dyn Stream<Item = anyhow::Result<ResponseStreamEvent>> + Send + 'a>>;

/// Splits a server-sent event byte stream into `data` payloads.
///
/// Chunks may end anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of every event they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut payloads);
        }
        payloads
    }

    /// Flush an event left open when the byte stream ended.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            let line = String::from_utf8_lossy(&rest);
            self.accept_line(line.trim_end_matches('\r'), &mut payloads);
        }
        self.accept_line("", &mut payloads);
        payloads
    }

    fn accept_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                let data = self.data.join("\n");
                self.data.clear();
                if data != "[DONE]" {
                    payloads.push(data);
                }
            }
            return;
        }
        // `event:`, `id:` and comment lines carry nothing the loop needs.
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_owned());
        }
    }
}

/// Parse one event payload. Event types the loop ignores give `None`.
#[must_use]
pub fn parse_event(data: &str) -> Option<ResponseStreamEvent> {
    let event: Value = serde_json::from_str(data).ok()?;
    let string_field = |key: &str| event.get(key).and_then(Value::as_str).map(str::to_owned);

    match event.get("type").and_then(Value::as_str)? {
        "response.created" => {
            let response_id = event.pointer("/response/id").and_then(Value::as_str)?;
            Some(ResponseStreamEvent::Created {
                response_id: response_id.to_owned(),
            })
        }
        "response.output_text.delta" | "response.refusal.delta" => {
            string_field("delta").map(|delta| ResponseStreamEvent::OutputTextDelta { delta })
        }
        "response.output_text.done" => {
            string_field("text").map(|text| ResponseStreamEvent::OutputTextDone { text })
        }
        "response.refusal.done" => {
            string_field("refusal").map(|text| ResponseStreamEvent::OutputTextDone { text })
        }
        "response.output_item.done" => match OutputItem::deserialize(event.get("item")?).ok()? {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => Some(ResponseStreamEvent::FunctionCallDone {
                call_id,
                name,
                arguments,
            }),
            _ => None,
        },
        "response.completed" => Response::deserialize(event.get("response")?)
            .ok()
            .map(ResponseStreamEvent::Completed),
        "response.failed" => Some(ResponseStreamEvent::Error {
            status: None,
            message: event
                .pointer("/response/error/message")
                .and_then(Value::as_str)
                .unwrap_or("response failed")
                .to_owned(),
        }),
        "error" => Some(ResponseStreamEvent::Error {
            status: None,
            message: string_field("message").unwrap_or_else(|| "stream error".to_owned()),
        }),
        _ => None,
    }
}

/// The events a streamed call would have produced for `outcome`.
#[must_use]
pub fn outcome_events(outcome: ResponseOutcome) -> Vec<ResponseStreamEvent> {
    let response = match outcome {
        ResponseOutcome::Success(response) => response,
        ResponseOutcome::RateLimited => {
            return vec![ResponseStreamEvent::Error {
                status: Some(429),
                message: "rate limited".to_owned(),
            }];
        }
        ResponseOutcome::InvalidRequest(message) => {
            return vec![ResponseStreamEvent::Error {
                status: Some(400),
                message,
            }];
        }
        ResponseOutcome::ServerError(message) => {
            return vec![ResponseStreamEvent::Error {
                status: Some(500),
                message,
            }];
        }
    };

    let mut events = Vec::new();
    if let Some(response_id) = &response.id {
        events.push(ResponseStreamEvent::Created {
            response_id: response_id.clone(),
        });
    }
    if let Some(text) = response.text().filter(|text| !text.is_empty()) {
        events.push(ResponseStreamEvent::OutputTextDelta { delta: text });
    }
    for item in &response.output {
        if let OutputItem::FunctionCall {
            call_id,
            name,
            arguments,
        } = item
        {
            events.push(ResponseStreamEvent::FunctionCallDone {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            });
        }
    }
    events.push(ResponseStreamEvent::Completed(response));
    events
}

/// Replay a non-streamed call as a response stream.
pub fn outcome_stream<'a, F>(outcome: F) -> ResponseStream<'a>
where
    F: Future<Output = anyhow::Result<ResponseOutcome>> + Send + 'a,
{
    Box::pin(async_stream::stream! {
        match outcome.await {
            Ok(outcome) => {
                for event in outcome_events(outcome) {
                    yield Ok(event);
                }
            }
            Err(e) => {
                yield Err(e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decoder_joins_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: response.output_text.delta\ndata: {\"delta\":").is_empty());
        let payloads = decoder.push(b"\"caf\xc3");
        assert!(payloads.is_empty());
        let payloads = decoder.push(b"\xa9\"}\r\n\r\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec![r#"{"delta":"café"}"#]);
    }

    #[test]
    fn test_decoder_multiline_data_and_finish() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b": keep-alive\n\ndata: a\ndata: b\n\n"), vec!["a\nb"]);
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_parse_created_and_text_events() {
        let created = json!({"type": "response.created", "response": {"id": "resp_1", "output": []}});
        assert_eq!(
            parse_event(&created.to_string()),
            Some(ResponseStreamEvent::Created {
                response_id: "resp_1".to_owned()
            })
        );

        let delta = json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "SELECT"});
        assert_eq!(
            parse_event(&delta.to_string()),
            Some(ResponseStreamEvent::OutputTextDelta {
                delta: "SELECT".to_owned()
            })
        );

        let refusal = json!({"type": "response.refusal.done", "refusal": "I can't help with that."});
        assert_eq!(
            parse_event(&refusal.to_string()),
            Some(ResponseStreamEvent::OutputTextDone {
                text: "I can't help with that.".to_owned()
            })
        );
    }

    #[test]
    fn test_parse_function_call_item() {
        let done = json!({
            "type": "response.output_item.done",
            "output_index": 0,
            "item": {
                "type": "function_call",
                "id": "fc_1",
                "call_id": "call_1",
                "name": "get_course_week_context",
                "arguments": "{\"week\":9}",
                "status": "completed"
            }
        });
        assert_eq!(
            parse_event(&done.to_string()),
            Some(ResponseStreamEvent::FunctionCallDone {
                call_id: Some("call_1".to_owned()),
                name: Some("get_course_week_context".to_owned()),
                arguments: json!("{\"week\":9}"),
            })
        );

        let message = json!({
            "type": "response.output_item.done",
            "item": {"type": "message", "content": []}
        });
        assert_eq!(parse_event(&message.to_string()), None);
    }

    #[test]
    fn test_parse_completed_and_failures() {
        let completed = json!({
            "type": "response.completed",
            "response": {
                "id": "resp_2",
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "done", "annotations": []}]}],
                "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
            }
        });
        match parse_event(&completed.to_string()) {
            Some(ResponseStreamEvent::Completed(response)) => {
                assert_eq!(response.id.as_deref(), Some("resp_2"));
                assert_eq!(response.text().as_deref(), Some("done"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let failed = json!({"type": "response.failed", "response": {"id": "resp_3", "error": {"message": "overloaded"}}});
        assert_eq!(
            parse_event(&failed.to_string()),
            Some(ResponseStreamEvent::Error {
                status: None,
                message: "overloaded".to_owned()
            })
        );

        assert_eq!(parse_event(r#"{"type":"response.in_progress"}"#), None);
        assert_eq!(parse_event("not json"), None);
    }

    #[test]
    fn test_outcome_events_for_tool_calls() {
        let response = Response {
            id: Some("resp_1".to_owned()),
            output: vec![OutputItem::function_call("call_1", "get_database_schema", "{}")],
            ..Response::default()
        };
        let events = outcome_events(ResponseOutcome::Success(response.clone()));
        assert_eq!(
            events,
            vec![
                ResponseStreamEvent::Created {
                    response_id: "resp_1".to_owned()
                },
                ResponseStreamEvent::FunctionCallDone {
                    call_id: Some("call_1".to_owned()),
                    name: Some("get_database_schema".to_owned()),
                    arguments: json!("{}"),
                },
                ResponseStreamEvent::Completed(response),
            ]
        );

        assert_eq!(
            outcome_events(ResponseOutcome::RateLimited),
            vec![ResponseStreamEvent::Error {
                status: Some(429),
                message: "rate limited".to_owned()
            }]
        );
    }
}
