use crate::llm::streaming::outcome_stream;
use crate::llm::{
    OutputItem, Response, ResponseOutcome, ResponseRequest, ResponseStream, ResponseStreamEvent,
    ResponsesProvider, Usage,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

// ===================
// Mock Responses Provider
// ===================

type Responder = Box<dyn Fn(&ResponseRequest) -> ResponseOutcome + Send + Sync>;

/// Replays scripted outcomes and records every request it receives.
pub struct MockProvider {
    script: Mutex<VecDeque<ResponseOutcome>>,
    fallback: Option<ResponseOutcome>,
    responder: Option<Responder>,
    streams: Mutex<VecDeque<Vec<Result<ResponseStreamEvent>>>>,
    requests: Mutex<Vec<ResponseRequest>>,
}

impl MockProvider {
    pub fn new(script: Vec<ResponseOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            responder: None,
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay one scripted event stream per streamed request.
    pub fn streaming(streams: Vec<Vec<Result<ResponseStreamEvent>>>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Answer every request with `responder(request)`.
    pub fn responding(
        responder: impl Fn(&ResponseRequest) -> ResponseOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    /// Answer with `outcome` forever once the script runs out.
    pub fn repeating(outcome: ResponseOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("lock poisoned").len()
    }

    pub fn text_response(id: &str, text: &str) -> ResponseOutcome {
        ResponseOutcome::Success(Response {
            id: Some(id.to_string()),
            model: Some("mock-model".to_string()),
            output_text: None,
            output: vec![OutputItem::message(text)],
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
            }),
        })
    }

    pub fn created(id: &str) -> Result<ResponseStreamEvent> {
        Ok(ResponseStreamEvent::Created {
            response_id: id.to_string(),
        })
    }

    pub fn delta(text: &str) -> Result<ResponseStreamEvent> {
        Ok(ResponseStreamEvent::OutputTextDelta {
            delta: text.to_string(),
        })
    }

    pub fn call_done(call_id: &str, name: &str, arguments: &str) -> Result<ResponseStreamEvent> {
        Ok(ResponseStreamEvent::FunctionCallDone {
            call_id: Some(call_id.to_string()),
            name: Some(name.to_string()),
            arguments: serde_json::Value::String(arguments.to_string()),
        })
    }

    pub fn completed(id: &str, output: Vec<OutputItem>) -> Result<ResponseStreamEvent> {
        Ok(ResponseStreamEvent::Completed(Response {
            id: Some(id.to_string()),
            output,
            ..Response::default()
        }))
    }

    pub fn tool_call_response(id: &str, calls: Vec<(&str, &str, &str)>) -> ResponseOutcome {
        ResponseOutcome::Success(Response {
            id: Some(id.to_string()),
            model: Some("mock-model".to_string()),
            output_text: None,
            output: calls
                .into_iter()
                .map(|(call_id, name, arguments)| OutputItem::function_call(call_id, name, arguments))
                .collect(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
            }),
        })
    }
}

#[async_trait]
impl ResponsesProvider for MockProvider {
    async fn create(&self, request: ResponseRequest) -> Result<ResponseOutcome> {
        if let Some(responder) = &self.responder {
            let outcome = responder(&request);
            self.requests.lock().expect("lock poisoned").push(request);
            return Ok(outcome);
        }
        self.requests.lock().expect("lock poisoned").push(request);
        let next = self.script.lock().expect("lock poisoned").pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(outcome) => Ok(outcome),
            None => anyhow::bail!("mock provider script exhausted"),
        }
    }

    fn create_stream(&self, request: ResponseRequest) -> ResponseStream<'_> {
        let scripted = self.streams.lock().expect("lock poisoned").pop_front();
        match scripted {
            Some(events) => {
                self.requests.lock().expect("lock poisoned").push(request);
                Box::pin(futures::stream::iter(events))
            }
            None => outcome_stream(self.create(request)),
        }
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}
