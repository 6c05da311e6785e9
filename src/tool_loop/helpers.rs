use crate::config::RuntimeAgentConfig;
use crate::llm::{InputItem, OutputItem, Response, ResponseRequest, ToolCallRequest, ToolDefinition};
use crate::types::{ToolLoopError, ToolLoopOptions};
use serde_json::Value;
use std::collections::BTreeMap;

/// Convert u128 milliseconds to u64, capping at `u64::MAX`
#[allow(clippy::cast_possible_truncation)]
pub(super) const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

pub(super) fn new_trace_id() -> String {
    format!("rsp_{}", uuid::Uuid::new_v4())
}

/// Build the request for one iteration. Options win over the runtime config.
pub(super) fn compose_request(
    input: Vec<InputItem>,
    previous_response_id: Option<String>,
    iteration: usize,
    options: &ToolLoopOptions,
    config: &RuntimeAgentConfig,
) -> ResponseRequest {
    let model = options
        .model
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| config.model.clone());
    let tools = options.tools.clone().unwrap_or_else(|| config.tools.clone());
    let tool_choice = options
        .tool_choice
        .clone()
        .filter(|choice| iteration == 1 || !forces_tool_call(choice));
    let tool_choice = normalize_tool_choice(tool_choice, &tools);

    let mut metadata = BTreeMap::from([
        ("trace_id".to_owned(), new_trace_id()),
        ("tool_loop_iteration".to_owned(), iteration.to_string()),
    ]);
    metadata.extend(options.metadata.clone());

    ResponseRequest {
        model,
        instructions: compose_instructions(&config.instructions, options),
        input,
        previous_response_id,
        tools,
        tool_choice,
        parallel_tool_calls: options.parallel_tool_calls,
        text: options.text.clone(),
        metadata,
    }
}

pub(super) fn compose_instructions(base: &str, options: &ToolLoopOptions) -> Option<String> {
    let base = options
        .instructions
        .as_deref()
        .filter(|i| !i.is_empty())
        .unwrap_or(base);

    let instructions = match options.extra_instructions.as_deref() {
        Some(extra) if !extra.is_empty() => format!("{base}\n\n{extra}"),
        _ => base.to_owned(),
    };
    (!instructions.is_empty()).then_some(instructions)
}

/// Whether `choice` makes the model call a tool instead of answering.
///
/// Such a choice only shapes the first request of a run; repeating it would
/// never let the model answer.
pub(super) fn forces_tool_call(choice: &Value) -> bool {
    match choice {
        Value::String(mode) => mode == "required",
        Value::Object(_) => choice.get("type").and_then(Value::as_str) == Some("function"),
        _ => false,
    }
}

/// Drop a `{"type": "function", "name": ...}` choice naming a tool that is not
/// offered. Any other choice passes through.
pub(super) fn normalize_tool_choice(
    choice: Option<Value>,
    tools: &[ToolDefinition],
) -> Option<Value> {
    let choice = choice?;
    let is_function = choice.get("type").and_then(Value::as_str) == Some("function");
    let Some(name) = choice.get("name").and_then(Value::as_str).filter(|_| is_function) else {
        return Some(choice);
    };
    if name.is_empty() {
        return Some(choice);
    }

    tools
        .iter()
        .any(|tool| tool.is_function() && tool.name == name)
        .then_some(choice)
}

/// Function calls of `response`, in output order.
pub(super) fn extract_function_calls(
    response: &Response,
) -> Result<Vec<ToolCallRequest>, ToolLoopError> {
    response
        .output
        .iter()
        .filter_map(|item| match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => Some((call_id, name, arguments)),
            _ => None,
        })
        .map(|(call_id, name, arguments)| {
            function_call_request(call_id.clone(), name.clone(), arguments)
        })
        .collect()
}

/// A function call item as a [`ToolCallRequest`]. `call_id` and `name` are
/// required.
pub(super) fn function_call_request(
    call_id: Option<String>,
    name: Option<String>,
    arguments: &Value,
) -> Result<ToolCallRequest, ToolLoopError> {
    let call_id = call_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ToolLoopError::malformed("function_call without call_id"))?;
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ToolLoopError::malformed("function_call without name"))?;
    Ok(ToolCallRequest {
        call_id,
        name,
        arguments: arguments_string(arguments),
    })
}

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Null => "{}".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentDefaults;
    use serde_json::json;

    fn config() -> RuntimeAgentConfig {
        RuntimeAgentConfig::from_defaults(&AgentDefaults::default())
    }

    #[test]
    fn test_trace_id_format() {
        let id = new_trace_id();
        assert!(id.starts_with("rsp_"));
        assert_eq!(id.len(), "rsp_".len() + 36);
    }

    #[test]
    fn test_instructions_composition() {
        let mut options = ToolLoopOptions::default();
        assert_eq!(compose_instructions("base", &options).as_deref(), Some("base"));

        options.extra_instructions = Some("Week 9 only.".to_owned());
        assert_eq!(
            compose_instructions("base", &options).as_deref(),
            Some("base\n\nWeek 9 only.")
        );

        options.instructions = Some("override".to_owned());
        assert_eq!(
            compose_instructions("base", &options).as_deref(),
            Some("override\n\nWeek 9 only.")
        );

        assert_eq!(compose_instructions("", &ToolLoopOptions::default()), None);
    }

    #[test]
    fn test_tool_choice_normalization() {
        let tools = vec![ToolDefinition::function(
            "execute_sql_query",
            "Run SQL",
            json!({}),
        )];

        let offered = json!({ "type": "function", "name": "execute_sql_query" });
        assert_eq!(
            normalize_tool_choice(Some(offered.clone()), &tools),
            Some(offered)
        );

        let missing = json!({ "type": "function", "name": "get_weather" });
        assert_eq!(normalize_tool_choice(Some(missing), &tools), None);

        assert_eq!(
            normalize_tool_choice(Some(json!("required")), &tools),
            Some(json!("required"))
        );
        assert_eq!(normalize_tool_choice(None, &tools), None);
    }

    #[test]
    fn test_forced_tool_choice_only_on_first_iteration() {
        let forced = json!({ "type": "function", "name": "get_course_week_context" });
        let options = ToolLoopOptions {
            tool_choice: Some(forced.clone()),
            ..ToolLoopOptions::default()
        };
        let first = compose_request(Vec::new(), None, 1, &options, &config());
        assert_eq!(first.tool_choice, Some(forced));

        let second = compose_request(Vec::new(), Some("resp_1".to_owned()), 2, &options, &config());
        assert_eq!(second.tool_choice, None);

        let required = ToolLoopOptions {
            tool_choice: Some(json!("required")),
            ..ToolLoopOptions::default()
        };
        assert_eq!(compose_request(Vec::new(), None, 3, &required, &config()).tool_choice, None);

        let auto = ToolLoopOptions {
            tool_choice: Some(json!("auto")),
            ..ToolLoopOptions::default()
        };
        assert_eq!(
            compose_request(Vec::new(), None, 3, &auto, &config()).tool_choice,
            Some(json!("auto"))
        );
    }

    #[test]
    fn test_compose_request_metadata_and_defaults() {
        let mut options = ToolLoopOptions::default();
        options
            .metadata
            .insert("conversation_id".to_owned(), "c1".to_owned());
        options
            .metadata
            .insert("tool_loop_iteration".to_owned(), "custom".to_owned());

        let request = compose_request(
            vec![InputItem::user("hi")],
            Some("resp_0".to_owned()),
            2,
            &options,
            &config(),
        );

        assert_eq!(request.model, crate::config::DEFAULT_MODEL);
        assert_eq!(request.previous_response_id.as_deref(), Some("resp_0"));
        assert_eq!(request.tools.len(), 4);
        assert!(request.metadata["trace_id"].starts_with("rsp_"));
        assert_eq!(request.metadata["conversation_id"], "c1");
        assert_eq!(request.metadata["tool_loop_iteration"], "custom");
    }

    #[test]
    fn test_compose_request_options_override_config() {
        let options = ToolLoopOptions {
            model: Some("gpt-4.1".to_owned()),
            tools: Some(Vec::new()),
            tool_choice: Some(json!({ "type": "function", "name": "execute_sql_query" })),
            parallel_tool_calls: Some(false),
            ..ToolLoopOptions::default()
        };
        let request = compose_request(Vec::new(), None, 1, &options, &config());
        assert_eq!(request.model, "gpt-4.1");
        assert!(request.tools.is_empty());
        assert_eq!(request.tool_choice, None);
        assert_eq!(request.parallel_tool_calls, Some(false));
        assert_eq!(request.metadata["tool_loop_iteration"], "1");
    }

    #[test]
    fn test_extract_function_calls() {
        let response = Response {
            id: Some("resp_1".to_owned()),
            output: vec![
                OutputItem::message("thinking"),
                OutputItem::function_call("call_1", "get_course_week_context", r#"{"week":9}"#),
                OutputItem::FunctionCall {
                    call_id: Some("call_2".to_owned()),
                    name: Some("get_database_schema".to_owned()),
                    arguments: json!({ "database": "practice" }),
                },
            ],
            ..Response::default()
        };

        let calls = extract_function_calls(&response).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, r#"{"week":9}"#);
        assert_eq!(calls[1].call_id, "call_2");
        assert_eq!(calls[1].arguments, r#"{"database":"practice"}"#);
    }

    #[test]
    fn test_extract_function_calls_rejects_missing_fields() {
        let response = Response {
            id: Some("resp_1".to_owned()),
            output: vec![OutputItem::FunctionCall {
                call_id: None,
                name: Some("get_database_schema".to_owned()),
                arguments: Value::Null,
            }],
            ..Response::default()
        };
        assert!(matches!(
            extract_function_calls(&response),
            Err(ToolLoopError::MalformedResponse(_))
        ));
    }
}
