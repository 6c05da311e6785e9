//! `OpenAI` Responses API provider.
//!
//! Posts [`ResponseRequest`]s to `/v1/responses` and maps HTTP failures onto
//! [`ResponseOutcome`] variants. Streamed calls decode the server-sent events
//! into [`ResponseStreamEvent`]s. Every call is logged with the request's
//! `trace_id` metadata so it can be matched with the service's records.

use crate::config::ResponsesProviderConfig;
use crate::llm::streaming::{SseDecoder, parse_event};
use crate::llm::{
    Response, ResponseOutcome, ResponseRequest, ResponseStream, ResponseStreamEvent,
    ResponsesProvider,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Instant;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `OpenAI` Responses API provider.
#[derive(Clone)]
pub struct OpenAIResponsesProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIResponsesProvider {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_owned())
    }

    /// Create a provider with a custom base URL (proxies, test servers).
    #[must_use]
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn from_config(config: ResponsesProviderConfig) -> Self {
        Self::with_base_url(config.api_key, config.base_url)
    }

    /// Build from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_config(ResponsesProviderConfig::from_env()?))
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url)
    }
}

#[derive(Serialize)]
struct StreamingRequest<'a> {
    #[serde(flatten)]
    request: &'a ResponseRequest,
    stream: bool,
}

fn trace_id_of(request: &ResponseRequest) -> String {
    request
        .metadata
        .get("trace_id")
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ResponsesProvider for OpenAIResponsesProvider {
    async fn create(&self, request: ResponseRequest) -> Result<ResponseOutcome> {
        let trace_id = trace_id_of(&request);
        let model = request.model.clone();
        let start = Instant::now();

        tracing::debug!(
            trace_id = %trace_id,
            model = %model,
            previous_response_id = ?request.previous_response_id,
            input_items = request.input.len(),
            "create_response.request"
        );

        let response = match self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    trace_id = %trace_id,
                    duration_ms = elapsed_ms(start),
                    message = %e,
                    "create_response.error"
                );
                return Err(anyhow::anyhow!("request failed: {e}"));
            }
        };

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .context("failed to read response body")?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(trace_id = %trace_id, "create_response.rate_limited");
            return Ok(ResponseOutcome::RateLimited);
        }

        if status.is_server_error() {
            let body = String::from_utf8_lossy(&bytes);
            tracing::error!(
                trace_id = %trace_id,
                status = %status,
                duration_ms = elapsed_ms(start),
                body = %body,
                "create_response.error"
            );
            return Ok(ResponseOutcome::ServerError(body.into_owned()));
        }

        if status.is_client_error() {
            let body = String::from_utf8_lossy(&bytes);
            tracing::warn!(
                trace_id = %trace_id,
                status = %status,
                body = %body,
                "create_response.invalid_request"
            );
            return Ok(ResponseOutcome::InvalidRequest(body.into_owned()));
        }

        let parsed: Response =
            serde_json::from_slice(&bytes).context("failed to parse response body")?;

        tracing::info!(
            trace_id = %trace_id,
            response_id = parsed.id.as_deref().unwrap_or_default(),
            model = %model,
            tool_calls = parsed.has_function_calls(),
            duration_ms = elapsed_ms(start),
            "create_response.success"
        );

        Ok(ResponseOutcome::Success(parsed))
    }

    fn create_stream(&self, request: ResponseRequest) -> ResponseStream<'_> {
        Box::pin(async_stream::stream! {
            let trace_id = trace_id_of(&request);
            let start = Instant::now();

            tracing::debug!(
                trace_id = %trace_id,
                model = %request.model,
                previous_response_id = ?request.previous_response_id,
                input_items = request.input.len(),
                "stream_response.request"
            );

            let response = match self
                .client
                .post(self.endpoint())
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&StreamingRequest { request: &request, stream: true })
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(
                        trace_id = %trace_id,
                        duration_ms = elapsed_ms(start),
                        message = %e,
                        "stream_response.error"
                    );
                    yield Err(anyhow::anyhow!("request failed: {e}"));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    trace_id = %trace_id,
                    status = %status,
                    body = %body,
                    "stream_response.error"
                );
                yield Ok(ResponseStreamEvent::Error {
                    status: Some(status.as_u16()),
                    message: body,
                });
                return;
            }

            tracing::info!(
                trace_id = %trace_id,
                model = %request.model,
                duration_ms = elapsed_ms(start),
                "stream_response.started"
            );

            let mut decoder = SseDecoder::new();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!(trace_id = %trace_id, message = %e, "stream_response.error");
                        yield Err(anyhow::anyhow!("stream error: {e}"));
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    if let Some(event) = parse_event(&data) {
                        yield Ok(event);
                    }
                }
            }
            for data in decoder.finish() {
                if let Some(event) = parse_event(&data) {
                    yield Ok(event);
                }
            }

            tracing::debug!(
                trace_id = %trace_id,
                duration_ms = elapsed_ms(start),
                "stream_response.finished"
            );
        })
    }

    fn provider(&self) -> &'static str {
        "openai-responses"
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
