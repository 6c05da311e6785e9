//! Tools offered to the SQL tutor model.
//!
//! The course week context comes from a [`WeekContentSource`] (the course
//! content collection in production); the SQL tools answer from the sandbox
//! fixtures and never touch a live database.

use crate::curriculum::{LAST_COURSE_WEEK, allowed_concepts, forbidden_concepts};
use crate::llm::ToolDefinition;
use crate::tools::{RegistryHandler, Tool, ToolContext, ToolName, ToolRegistry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const ALLOWED_DATABASES: &[&str] = &["practice", "examples", "homework"];

/// Statements refused by `execute_sql_query`, matched on whole words.
static WRITE_STATEMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|TRUNCATE|ALTER|CREATE|INSERT|UPDATE)\b")
        .expect("write statement pattern compiles")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TutorToolName {
    GetCourseWeekContext,
    ExecuteSqlQuery,
    GetDatabaseSchema,
    AnalyzeQueryPerformance,
}

impl ToolName for TutorToolName {}

// ============================================================================
// Week content
// ============================================================================

/// Published content for one course week.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekContent {
    pub week_number: Option<u32>,
    pub content: String,
    pub date_range: Option<String>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
}

/// Where week content is read from.
#[async_trait]
pub trait WeekContentSource: Send + Sync {
    /// Content for a specific week.
    ///
    /// # Errors
    /// Returns an error if the content store cannot be read.
    async fn week(&self, week: u32) -> Result<WeekContent>;

    /// Content for the week the calendar is currently in. The week number may
    /// lie past the last curriculum week once the semester is over.
    ///
    /// # Errors
    /// Returns an error if the content store cannot be read.
    async fn current_week(&self) -> Result<WeekContent>;
}

/// Fixed week content, for tests and local runs.
#[derive(Clone, Debug, Default)]
pub struct StaticWeekContent {
    weeks: BTreeMap<u32, WeekContent>,
    current: Option<u32>,
}

impl StaticWeekContent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_week(mut self, week: u32, content: impl Into<String>) -> Self {
        self.weeks.insert(
            week,
            WeekContent {
                week_number: Some(week),
                content: content.into(),
                ..WeekContent::default()
            },
        );
        self
    }

    #[must_use]
    pub fn with_current_week(mut self, week: u32) -> Self {
        self.current = Some(week);
        self
    }
}

#[async_trait]
impl WeekContentSource for StaticWeekContent {
    async fn week(&self, week: u32) -> Result<WeekContent> {
        Ok(self.weeks.get(&week).cloned().unwrap_or(WeekContent {
            week_number: Some(week),
            ..WeekContent::default()
        }))
    }

    async fn current_week(&self) -> Result<WeekContent> {
        match self.current {
            Some(week) => self.week(week).await,
            None => Ok(WeekContent::default()),
        }
    }
}

/// Context shared by the tutor tools.
#[derive(Clone)]
pub struct TutorContext {
    pub weeks: Arc<dyn WeekContentSource>,
}

impl TutorContext {
    pub fn new(weeks: impl WeekContentSource + 'static) -> Self {
        Self {
            weeks: Arc::new(weeks),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry with every tutor tool.
#[must_use]
pub fn tutor_registry() -> ToolRegistry<TutorContext> {
    let mut registry = ToolRegistry::new();
    registry
        .register(CourseWeekContextTool)
        .register(ExecuteSqlQueryTool)
        .register(DatabaseSchemaTool)
        .register(QueryPerformanceTool);
    registry
}

/// Tutor tool registry bound to `context`, ready to pass to the tool loop.
#[must_use]
pub fn tutor_handler(context: TutorContext) -> RegistryHandler<TutorContext> {
    tutor_registry().bind(ToolContext::new(context))
}

/// Schemas of every tutor tool.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    tutor_registry().definitions()
}

// ============================================================================
// get_course_week_context
// ============================================================================

pub struct CourseWeekContextTool;

impl Tool<TutorContext> for CourseWeekContextTool {
    type Name = TutorToolName;

    fn name(&self) -> TutorToolName {
        TutorToolName::GetCourseWeekContext
    }

    fn description(&self) -> &'static str {
        "Return the active SQL course week context, plus allowed and forbidden SQL concepts."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "description": "Optional week number. Without it, resolves the current academic week (after the semester ends, the last curriculum week).",
            "properties": {
                "week": { "type": "integer", "minimum": 1 }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext<TutorContext>, input: Value) -> Result<Value> {
        let requested = input
            .get("week")
            .and_then(Value::as_u64)
            .and_then(|w| u32::try_from(w).ok())
            .filter(|w| *w > 0);

        let weeks = &ctx.app.weeks;
        let mut payload = match requested {
            Some(week) => weeks.week(week).await,
            None => weeks.current_week().await,
        }
        .context("failed to load course week content")?;

        if requested.is_none() && payload.week_number.is_some_and(|w| w > LAST_COURSE_WEEK) {
            payload = weeks
                .week(LAST_COURSE_WEEK)
                .await
                .context("failed to load course week content")?;
        }

        let week_number = payload.week_number;
        let (allowed, forbidden) = week_number.map_or_else(
            || (Vec::new(), Vec::new()),
            |w| (allowed_concepts(w), forbidden_concepts(w)),
        );

        Ok(json!({
            "weekNumber": week_number,
            "content": payload.content,
            "dateRange": payload.date_range,
            "updatedAt": payload.updated_at,
            "updatedBy": payload.updated_by,
            "sqlRestrictions": {
                "weekNumber": week_number,
                "allowedConcepts": allowed,
                "forbiddenConcepts": forbidden,
            },
            "fetchedAt": OffsetDateTime::now_utc().format(&Rfc3339)?,
        }))
    }
}

// ============================================================================
// execute_sql_query
// ============================================================================

pub struct ExecuteSqlQueryTool;

impl Tool<TutorContext> for ExecuteSqlQueryTool {
    type Name = TutorToolName;

    fn name(&self) -> TutorToolName {
        TutorToolName::ExecuteSqlQuery
    }

    fn description(&self) -> &'static str {
        "Run a safe SQL query against an approved educational database context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "database": { "type": "string", "enum": ALLOWED_DATABASES },
                "explain_plan": { "type": "boolean" },
                "educational_context": { "type": "string" }
            },
            "required": ["query", "database"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<TutorContext>, input: Value) -> Result<Value> {
        let query = str_arg(&input, "query");
        let database = str_arg(&input, "database");
        let explain_plan = input
            .get("explain_plan")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let educational_context = match str_arg(&input, "educational_context") {
            "" => "Query execution completed successfully",
            context => context,
        };

        if !ALLOWED_DATABASES.contains(&database) {
            return Ok(json!({
                "success": false,
                "error": format!("Invalid database. Allowed databases: {}", ALLOWED_DATABASES.join(", ")),
            }));
        }

        if WRITE_STATEMENT_REGEX.is_match(query) {
            return Ok(json!({
                "success": false,
                "error": "Query contains potentially dangerous operations",
                "suggestion": "Use SELECT statements in this educational environment.",
            }));
        }

        let mut result = json!({
            "success": true,
            "query": query,
            "database": database,
            "results": [
                { "id": 1, "name": "Sample Data", "created_at": "2024-01-01" },
                { "id": 2, "name": "Example Record", "created_at": "2024-01-02" }
            ],
            "row_count": 2,
            "execution_time": "0.045s",
            "educational_context": educational_context,
        });

        if explain_plan {
            result["execution_plan"] = json!({
                "operation": "Table Scan",
                "cost": "0.1",
                "rows_examined": 100
            });
        }

        Ok(result)
    }
}

// ============================================================================
// get_database_schema
// ============================================================================

pub struct DatabaseSchemaTool;

impl Tool<TutorContext> for DatabaseSchemaTool {
    type Name = TutorToolName;

    fn name(&self) -> TutorToolName {
        TutorToolName::GetDatabaseSchema
    }

    fn description(&self) -> &'static str {
        "Return schema metadata for the selected educational SQL database."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "database": { "type": "string", "enum": ALLOWED_DATABASES },
                "table_pattern": { "type": "string" },
                "include_relationships": { "type": "boolean" }
            },
            "required": ["database"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<TutorContext>, input: Value) -> Result<Value> {
        let database = str_arg(&input, "database");
        let include_relationships = input
            .get("include_relationships")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut tables = vec![
            json!({ "name": "students", "columns": [
                { "name": "id", "type": "INT" },
                { "name": "name", "type": "VARCHAR(255)" }
            ]}),
            json!({ "name": "courses", "columns": [
                { "name": "id", "type": "INT" },
                { "name": "title", "type": "VARCHAR(255)" }
            ]}),
            json!({ "name": "enrollments", "columns": [
                { "name": "id", "type": "INT" },
                { "name": "student_id", "type": "INT" },
                { "name": "course_id", "type": "INT" }
            ]}),
        ];

        if let Some(pattern) = input.get("table_pattern").and_then(Value::as_str) {
            let Ok(regex) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
                return Ok(json!({ "error": format!("Invalid table_pattern: {pattern}") }));
            };
            tables.retain(|table| {
                table["name"]
                    .as_str()
                    .is_some_and(|name| regex.is_match(name))
            });
        }

        let mut schema = json!({ "database": database, "tables": tables });
        if include_relationships {
            schema["relationships"] = json!([
                { "table": "enrollments", "column": "student_id",
                  "references": { "table": "students", "column": "id" } },
                { "table": "enrollments", "column": "course_id",
                  "references": { "table": "courses", "column": "id" } }
            ]);
        }

        Ok(schema)
    }
}

// ============================================================================
// analyze_query_performance
// ============================================================================

pub struct QueryPerformanceTool;

impl Tool<TutorContext> for QueryPerformanceTool {
    type Name = TutorToolName;

    fn name(&self) -> TutorToolName {
        TutorToolName::AnalyzeQueryPerformance
    }

    fn description(&self) -> &'static str {
        "Analyze a SQL query and return optimization hints for students."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "database_context": { "type": "object" },
                "learning_level": {
                    "type": "string",
                    "enum": ["beginner", "intermediate", "advanced"]
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<TutorContext>, input: Value) -> Result<Value> {
        let learning_level = match str_arg(&input, "learning_level") {
            "" => "intermediate",
            level => level,
        };

        Ok(json!({
            "query": str_arg(&input, "query"),
            "performance_score": 75,
            "complexity_level": learning_level,
            "optimization_suggestions": [
                "Add indexes for columns used in WHERE clauses.",
                "Avoid SELECT * when only a few columns are needed."
            ]
        }))
    }
}

fn str_arg<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}
