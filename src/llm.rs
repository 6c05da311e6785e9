pub mod streaming;
pub mod types;

pub use streaming::{ResponseStream, ResponseStreamEvent};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// A stateful completion service speaking the Responses API shape.
#[async_trait]
pub trait ResponsesProvider: Send + Sync {
    async fn create(&self, request: ResponseRequest) -> Result<ResponseOutcome>;

    /// Stream the response to `request` as server-sent events.
    ///
    /// Providers without a streaming transport replay [`create`](Self::create).
    fn create_stream(&self, request: ResponseRequest) -> ResponseStream<'_> {
        streaming::outcome_stream(self.create(request))
    }

    fn provider(&self) -> &'static str;
}
