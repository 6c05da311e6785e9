//! Michael tutor core - tool calling and per-key serialization for the SQL tutor.
//!
//! This crate provides:
//! - [`KeyedMutex`]: async critical sections serialized per string key
//! - [`ToolCallLoop`]: a bounded tool-calling loop over the Responses API
//! - The tutor's tools, SQL curriculum and runtime agent configuration
//!
//! # Example
//!
//! ```ignore
//! use michael_tutor::{
//!     InputItem, StaticWeekContent, ToolCallLoop, ToolLoopOptions, TutorContext,
//!     providers::OpenAIResponsesProvider, tutor_handler,
//! };
//!
//! let tutor = ToolCallLoop::new(OpenAIResponsesProvider::from_env()?);
//! let handler = tutor_handler(TutorContext::new(StaticWeekContent::new().with_current_week(9)));
//!
//! let outcome = tutor
//!     .run(vec![InputItem::user("Which joins can I use?")], &handler, ToolLoopOptions::default())
//!     .await?;
//! println!("{}", outcome.text);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod curriculum;
mod keyed_mutex;
pub mod llm;
pub mod providers;
mod stores;
mod structured;
mod tool_loop;
mod tools;
pub mod tutor_tools;
mod types;

pub use config::{
    AgentConfigSource, AgentDefaults, ConfigUpdate, ResponsesProviderConfig, RuntimeAgentConfig,
    RuntimeConfigCache,
};
pub use keyed_mutex::KeyedMutex;
pub use llm::{
    InputItem, Response, ResponseStream, ResponseStreamEvent, ResponsesProvider, ToolCallOutput,
    ToolCallRequest,
};
pub use stores::{InMemoryConfigStore, RuntimeConfigStore};
pub use structured::{SqlTutorResponse, extract_sql_tutor_response, sql_tutor_response_format};
pub use tool_loop::ToolCallLoop;
pub use tools::{
    HandlerFn, RegistryHandler, Tool, ToolContext, ToolHandler, ToolName, ToolRegistry, handler_fn,
};
pub use tutor_tools::{StaticWeekContent, TutorContext, WeekContentSource, tutor_handler};
pub use types::{
    DEFAULT_MAX_ITERATIONS, ToolLoopError, ToolLoopEvent, ToolLoopOptions, ToolLoopOutcome,
};
