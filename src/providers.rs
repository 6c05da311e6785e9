//! Completion service providers.

pub mod openai_responses;

pub use openai_responses::OpenAIResponsesProvider;
