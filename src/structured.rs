//! Structured SQL tutor answers.
//!
//! Pass [`sql_tutor_response_format`] as [`ToolLoopOptions::text`](crate::ToolLoopOptions)
//! to make the model answer with a JSON object, then read it back with
//! [`extract_sql_tutor_response`].

use crate::llm::Response;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A tutor answer to "write me a query that ...".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlTutorResponse {
    pub query: String,
    pub explanation: String,
    pub common_mistakes: Vec<String>,
    pub optimization: String,
}

/// Strict JSON schema output format for [`SqlTutorResponse`], in the
/// request's `text` field shape.
#[must_use]
pub fn sql_tutor_response_format() -> Value {
    json!({
        "format": {
            "type": "json_schema",
            "name": "sql_tutor_response",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A runnable SQL query that answers the student's request."
                    },
                    "explanation": {
                        "type": "string",
                        "description": "A clear, student-friendly explanation of how the query works."
                    },
                    "commonMistakes": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Common mistakes students might make with this query."
                    },
                    "optimization": {
                        "type": "string",
                        "description": "Suggestions for performance or readability improvements."
                    }
                },
                "required": ["query", "explanation", "commonMistakes", "optimization"]
            }
        }
    })
}

/// Parse the response text as a [`SqlTutorResponse`].
///
/// `None` if there is no text, it is not JSON, or a field is missing or has
/// the wrong type.
#[must_use]
pub fn extract_sql_tutor_response(response: &Response) -> Option<SqlTutorResponse> {
    let text = response.text().filter(|t| !t.is_empty())?;
    serde_json::from_str(&text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::OutputItem;

    fn response_with_text(text: &str) -> Response {
        Response {
            id: Some("resp_1".to_owned()),
            output: vec![OutputItem::message(text)],
            ..Response::default()
        }
    }

    #[test]
    fn test_format_requires_every_field() {
        let format = sql_tutor_response_format();
        assert_eq!(format["format"]["type"], "json_schema");
        assert_eq!(format["format"]["strict"], true);
        let required = format["format"]["schema"]["required"].as_array().unwrap();
        let properties = format["format"]["schema"]["properties"].as_object().unwrap();
        assert_eq!(required.len(), properties.len());
    }

    #[test]
    fn test_extracts_structured_answer() {
        let response = response_with_text(
            &json!({
                "query": "SELECT name FROM students WHERE id IN (SELECT student_id FROM enrollments)",
                "explanation": "The subquery lists enrolled students.",
                "commonMistakes": ["Using = with a multi-row subquery"],
                "optimization": "A JOIN may read better."
            })
            .to_string(),
        );
        let answer = extract_sql_tutor_response(&response).unwrap();
        assert!(answer.query.starts_with("SELECT name"));
        assert_eq!(answer.common_mistakes.len(), 1);
    }

    #[test]
    fn test_rejects_missing_or_invalid_answers() {
        assert!(extract_sql_tutor_response(&Response::default()).is_none());
        assert!(extract_sql_tutor_response(&response_with_text("")).is_none());
        assert!(extract_sql_tutor_response(&response_with_text("SELECT 1;")).is_none());

        let incomplete = json!({ "query": "SELECT 1", "explanation": "one" }).to_string();
        assert!(extract_sql_tutor_response(&response_with_text(&incomplete)).is_none());

        let wrong_type = json!({
            "query": "SELECT 1",
            "explanation": "one",
            "commonMistakes": [1, 2],
            "optimization": ""
        })
        .to_string();
        assert!(extract_sql_tutor_response(&response_with_text(&wrong_type)).is_none());
    }
}
