use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single `create` call against the Responses API.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub input: Vec<InputItem>,
    /// Conversation cursor of the previous turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Output text configuration, e.g. `{"format": {"type": "json_schema", ...}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ResponseRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, input: Vec<InputItem>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            input,
            previous_response_id: None,
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: None,
            text: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Call ids answered by this request's `function_call_output` items.
    pub fn tool_output_ids(&self) -> impl Iterator<Item = &str> {
        self.input.iter().filter_map(|item| match item {
            InputItem::FunctionCallOutput { call_id, .. } => Some(call_id.as_str()),
            InputItem::Message { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl InputItem {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::Assistant,
            content: vec![ContentPart::OutputText { text: text.into() }],
        }
    }

    #[must_use]
    pub fn developer(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::Developer,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

/// Function tool schema offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl ToolDefinition {
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_owned(),
            name: name.into(),
            description: description.into(),
            parameters,
            strict: None,
        }
    }

    #[must_use]
    pub fn is_function(&self) -> bool {
        self.r#type == "function"
    }
}

/// Response object returned by the service.
///
/// Fields are optional on the wire; the tool loop decides which ones it
/// cannot do without.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Response {
    /// Final answer text.
    ///
    /// Prefers the consolidated `output_text` field; otherwise joins the text
    /// and refusal parts of every `message` output item. `None` when neither
    /// exists.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        if let Some(text) = &self.output_text {
            return Some(text.clone());
        }

        let mut found = false;
        let mut joined = String::new();
        for item in &self.output {
            let OutputItem::Message { content, .. } = item else {
                continue;
            };
            for part in content {
                let text = match part {
                    OutputContent::OutputText { text } => text.as_str(),
                    OutputContent::Refusal { refusal } => refusal.as_str(),
                    OutputContent::Other => continue,
                };
                found = true;
                joined.push_str(text);
            }
        }
        found.then_some(joined)
    }

    /// The model's refusal, if a message declined to answer.
    #[must_use]
    pub fn refusal(&self) -> Option<&str> {
        self.output.iter().find_map(|item| match item {
            OutputItem::Message { content, .. } => content.iter().find_map(|part| match part {
                OutputContent::Refusal { refusal } => Some(refusal.as_str()),
                _ => None,
            }),
            _ => None,
        })
    }

    #[must_use]
    pub fn has_function_calls(&self) -> bool {
        self.output
            .iter()
            .any(|item| matches!(item, OutputItem::FunctionCall { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        /// Usually a JSON string; some gateways send the decoded object.
        #[serde(default)]
        arguments: Value,
    },
    #[serde(other)]
    Other,
}

impl OutputItem {
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message {
            role: Some("assistant".to_owned()),
            content: vec![OutputContent::OutputText {
                text: TextValue::Plain(text.into()),
            }],
        }
    }

    #[must_use]
    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::FunctionCall {
            call_id: Some(call_id.into()),
            name: Some(name.into()),
            arguments: Value::String(arguments.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText { text: TextValue },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TextValue {
    Plain(String),
    Annotated { value: String },
}

impl TextValue {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(text) | Self::Annotated { value: text } => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A function call the model asked the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments string.
    pub arguments: String,
}

/// The caller's answer to one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub call_id: String,
    pub output: String,
}

impl From<ToolCallOutput> for InputItem {
    fn from(output: ToolCallOutput) -> Self {
        Self::FunctionCallOutput {
            call_id: output.call_id,
            output: output.output,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Success(Response),
    RateLimited,
    InvalidRequest(String),
    ServerError(String),
}
