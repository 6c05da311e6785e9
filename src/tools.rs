//! Tool definition, registry and handlers.
//!
//! Tools are the functions the tutor model may call. This module provides:
//!
//! - [`Tool`] trait - Define a tool the model can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`ToolRegistry`] - Collection of available tools
//! - [`ToolHandler`] - What the tool-call loop invokes for each function call
//! - [`handler_fn`] - Adapt an async closure into a [`ToolHandler`]
//!
//! # Implementing a Tool
//!
//! ```ignore
//! struct ListTables;
//!
//! impl Tool<TutorContext> for ListTables {
//!     type Name = TutorToolName;
//!
//!     fn name(&self) -> TutorToolName { TutorToolName::GetDatabaseSchema }
//!     fn description(&self) -> &'static str { "List sandbox tables" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object", "properties": {} }) }
//!
//!     async fn execute(&self, ctx: &ToolContext<TutorContext>, input: Value) -> Result<Value> {
//!         Ok(json!({ "tables": ["students"] }))
//!     }
//! }
//! ```

use crate::llm::{ToolCallRequest, ToolDefinition};
use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// Tool Name Types
// ============================================================================

/// Marker trait for tool names.
///
/// The string sent to the model is the name's serde representation, so an
/// enum with `#[serde(rename_all = "snake_case")]` gives `get_database_schema`
/// for `GetDatabaseSchema`.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// String representation of a tool name via serde.
///
/// Names that do not serialize to a JSON string map to an empty string.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}

// ============================================================================
// Tool Context
// ============================================================================

/// Context passed to tool execution.
pub struct ToolContext<Ctx> {
    /// Application-specific context (data sources, clocks, ...)
    pub app: Ctx,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub const fn new(app: Ctx) -> Self {
        Self { app }
    }
}

impl<Ctx: Clone> Clone for ToolContext<Ctx> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// Definition of a tool that can be called by the model.
///
/// Implementations may use `async fn execute`; no `async_trait` needed.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &'static str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the decoded arguments.
    ///
    /// The returned value is serialized to JSON and sent back to the model.
    ///
    /// # Errors
    /// Returns an error if the tool cannot produce a result at all. Such an
    /// error aborts the tool-call loop, so validation problems the model can
    /// fix should be returned as an `{"error": ...}` value instead.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        input: Value,
    ) -> impl Future<Output = Result<Value>> + Send;
}

/// Type-erased tool trait for registry storage.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    /// Get the tool name as a string.
    fn name_str(&self) -> &str;
    /// Get the tool description.
    fn description(&self) -> &'static str;
    /// Get the JSON schema for tool inputs.
    fn input_schema(&self) -> Value;
    /// Execute the tool with the given input.
    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<Value>;
}

/// Wrapper that erases the Name associated type from a Tool.
struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    _marker: PhantomData<fn() -> Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        Self {
            inner: tool,
            name_cache,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<Value> {
        self.inner.execute(ctx, input).await
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of available tools, in registration order.
pub struct ToolRegistry<Ctx> {
    tools: HashMap<String, Arc<dyn ErasedTool<Ctx>>>,
    order: Vec<String>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
            order: self.order.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_owned();
        if self.tools.insert(name.clone(), Arc::new(wrapper)).is_none() {
            self.order.push(name);
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Remove tools for which the predicate returns false.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
        self.order.retain(|name| predicate(name));
    }

    /// Function tool definitions for the request's `tools` field.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                ToolDefinition::function(
                    tool.name_str(),
                    tool.description(),
                    tool.input_schema(),
                )
            })
            .collect()
    }

    /// Bind the registry to a context so it can serve as a [`ToolHandler`].
    #[must_use]
    pub fn bind(self, context: ToolContext<Ctx>) -> RegistryHandler<Ctx> {
        RegistryHandler {
            registry: self,
            context,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Resolves one function call into its JSON-encoded output.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// # Errors
    /// An error aborts the tool-call loop and is returned to its caller.
    async fn call(&self, request: ToolCallRequest) -> Result<String>;
}

/// [`ToolHandler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Adapt `Fn(ToolCallRequest) -> impl Future<Output = Result<String>>` into a
/// [`ToolHandler`].
pub const fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for HandlerFn<F>
where
    F: Fn(ToolCallRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn call(&self, request: ToolCallRequest) -> Result<String> {
        (self.f)(request).await
    }
}

/// A [`ToolRegistry`] bound to its execution context.
///
/// Unknown tools and undecodable arguments are answered with an
/// `{"error": ...}` payload so the model can correct itself; only a tool's
/// own failure is returned as an error.
pub struct RegistryHandler<Ctx> {
    registry: ToolRegistry<Ctx>,
    context: ToolContext<Ctx>,
}

impl<Ctx: Send + Sync + 'static> RegistryHandler<Ctx> {
    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry<Ctx> {
        &self.registry
    }
}

#[async_trait]
impl<Ctx: Send + Sync + 'static> ToolHandler for RegistryHandler<Ctx> {
    async fn call(&self, request: ToolCallRequest) -> Result<String> {
        let Some(tool) = self.registry.get(&request.name) else {
            warn!(
                "Model requested unknown tool (tool_name={}, call_id={})",
                request.name, request.call_id
            );
            return Ok(json!({ "error": format!("Unknown tool: {}", request.name) }).to_string());
        };

        let input = if request.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(&request.arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        "Invalid tool arguments (tool_name={}, call_id={}, error={})",
                        request.name, request.call_id, e
                    );
                    return Ok(json!({ "error": "Invalid tool arguments JSON" }).to_string());
                }
            }
        };

        let output = tool.execute(&self.context, input).await?;
        Ok(serde_json::to_string(&output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    enum TestToolName {
        EchoArgs,
        AlwaysFails,
    }

    impl ToolName for TestToolName {}

    struct EchoArgs;

    impl Tool<String> for EchoArgs {
        type Name = TestToolName;

        fn name(&self) -> TestToolName {
            TestToolName::EchoArgs
        }

        fn description(&self) -> &'static str {
            "Echo the arguments back"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, ctx: &ToolContext<String>, input: Value) -> Result<Value> {
            Ok(json!({ "context": ctx.app, "input": input }))
        }
    }

    struct AlwaysFails;

    impl Tool<String> for AlwaysFails {
        type Name = TestToolName;

        fn name(&self) -> TestToolName {
            TestToolName::AlwaysFails
        }

        fn description(&self) -> &'static str {
            "Fails"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _ctx: &ToolContext<String>, _input: Value) -> Result<Value> {
            anyhow::bail!("database offline")
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: "call_1".to_owned(),
            name: name.to_owned(),
            arguments: arguments.to_owned(),
        }
    }

    fn handler() -> RegistryHandler<String> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoArgs).register(AlwaysFails);
        registry.bind(ToolContext::new("ctx".to_owned()))
    }

    #[test]
    fn test_tool_name_to_string() {
        assert_eq!(tool_name_to_string(&TestToolName::EchoArgs), "echo_args");
        assert_eq!(tool_name_to_string(&TestToolName::AlwaysFails), "always_fails");
    }

    #[test]
    fn test_registry_keeps_registration_order() {
        let handler = handler();
        let names: Vec<_> = handler.registry().names().collect();
        assert_eq!(names, vec!["echo_args", "always_fails"]);

        let definitions = handler.registry().definitions();
        assert_eq!(definitions.len(), 2);
        assert!(definitions.iter().all(ToolDefinition::is_function));
        assert_eq!(definitions[0].description, "Echo the arguments back");
    }

    #[test]
    fn test_registry_filter() {
        let mut registry: ToolRegistry<String> = ToolRegistry::new();
        registry.register(EchoArgs).register(AlwaysFails);
        registry.filter(|name| name != "always_fails");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo_args"]);
    }

    #[tokio::test]
    async fn test_dispatches_with_context_and_arguments() -> anyhow::Result<()> {
        let output = handler().call(call("echo_args", r#"{"week":9}"#)).await?;
        let value: Value = serde_json::from_str(&output)?;
        assert_eq!(value, json!({ "context": "ctx", "input": { "week": 9 } }));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_arguments_mean_empty_object() -> anyhow::Result<()> {
        let output = handler().call(call("echo_args", "  ")).await?;
        let value: Value = serde_json::from_str(&output)?;
        assert_eq!(value["input"], json!({}));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_is_answered_not_failed() -> anyhow::Result<()> {
        let output = handler().call(call("get_weather", "{}")).await?;
        assert_eq!(output, r#"{"error":"Unknown tool: get_weather"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_answered_not_failed() -> anyhow::Result<()> {
        let output = handler().call(call("echo_args", "{not json")).await?;
        assert_eq!(output, r#"{"error":"Invalid tool arguments JSON"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_failure_propagates() {
        let error = handler()
            .call(call("always_fails", "{}"))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "database offline");
    }

    #[tokio::test]
    async fn test_handler_fn() -> anyhow::Result<()> {
        let handler = handler_fn(|request: ToolCallRequest| async move {
            Ok::<_, anyhow::Error>(format!("{}:{}", request.name, request.arguments))
        });
        assert_eq!(handler.call(call("x", "{}")).await?, "x:{}");
        Ok(())
    }
}
