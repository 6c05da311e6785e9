//! Agent configuration.
//!
//! - [`AgentDefaults`]: model, instructions and tools built into the binary
//! - [`RuntimeAgentConfig`]: the effective configuration, defaults overlaid
//!   with what admins saved at runtime
//! - [`RuntimeConfigCache`]: cached reads, serialized updates and rollback
//! - [`ResponsesProviderConfig`]: credentials for the completion service

use crate::keyed_mutex::KeyedMutex;
use crate::llm::ToolDefinition;
use crate::providers::openai_responses::DEFAULT_BASE_URL;
use crate::stores::RuntimeConfigStore;
use crate::tutor_tools;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

pub const DEFAULT_INSTRUCTIONS: &str = "You are Michael, an expert SQL tutor helping students learn SQL concepts. \
Call get_course_week_context before writing example queries and only use SQL concepts the \
current course week allows. Explain queries step by step, point out common mistakes, and \
prefer short runnable examples against the practice database.";

/// Cache lifetime of a configuration read from the store.
pub const CONFIG_TTL: Duration = Duration::from_secs(30);
/// Cache lifetime of the defaults served after a failed store read.
pub const FALLBACK_TTL: Duration = Duration::from_secs(10);
/// Snapshots kept in the configuration history.
pub const MAX_HISTORY_ITEMS: usize = 10;
/// Rollback target meaning "the most recent history snapshot".
pub const PREVIOUS_STABLE: &str = "previous-stable";

const CONFIG_WRITE_KEY: &str = "runtime-config";

// ============================================================================
// Provider
// ============================================================================

/// Connection settings for the Responses API.
#[derive(Clone, Debug)]
pub struct ResponsesProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

impl ResponsesProviderConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Read `OPENAI_API_KEY` and the optional `OPENAI_BASE_URL`.
    ///
    /// # Errors
    /// Returns an error if `OPENAI_API_KEY` is not set.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        let base_url = non_empty_env("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Ok(Self { api_key, base_url })
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Configuration used when nothing was saved at runtime.
#[derive(Clone, Debug)]
pub struct AgentDefaults {
    pub model: String,
    pub instructions: String,
    /// Every tool the agent can be given
    pub tools: Vec<ToolDefinition>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            tools: tutor_tools::tool_definitions(),
        }
    }
}

impl AgentDefaults {
    /// Defaults with `MICHAEL_MODEL` / `MICHAEL_INSTRUCTIONS` overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut defaults = Self::default();
        if let Some(model) = non_empty_env("MICHAEL_MODEL") {
            defaults.model = model;
        }
        if let Some(instructions) = non_empty_env("MICHAEL_INSTRUCTIONS") {
            defaults.instructions = instructions;
        }
        defaults
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

// ============================================================================
// Runtime configuration
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    Stored,
}

/// A configuration as it was before an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub model: String,
    pub instructions: String,
    pub enabled_tool_names: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The persisted configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRuntimeConfig {
    pub model: String,
    pub instructions: String,
    #[serde(default)]
    pub enabled_tool_names: Vec<String>,
    #[serde(default)]
    pub history: Vec<ConfigSnapshot>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Effective agent configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeAgentConfig {
    pub model: String,
    pub instructions: String,
    /// Tools offered to the model, in default order
    pub tools: Vec<ToolDefinition>,
    pub enabled_tool_names: Vec<String>,
    pub updated_at: Option<OffsetDateTime>,
    pub source: ConfigSource,
    /// Earlier configurations, oldest first
    pub history: Vec<ConfigSnapshot>,
}

impl RuntimeAgentConfig {
    #[must_use]
    pub fn from_defaults(defaults: &AgentDefaults) -> Self {
        Self {
            model: defaults.model.clone(),
            instructions: defaults.instructions.clone(),
            tools: defaults.tools.clone(),
            enabled_tool_names: defaults.tools.iter().map(|t| t.name.clone()).collect(),
            updated_at: None,
            source: ConfigSource::Default,
            history: Vec::new(),
        }
    }

    /// Overlay a stored document on the defaults. Empty fields keep the
    /// default value.
    #[must_use]
    pub fn from_stored(defaults: &AgentDefaults, stored: Option<StoredRuntimeConfig>) -> Self {
        let Some(stored) = stored else {
            return Self::from_defaults(defaults);
        };

        let enabled_tool_names = normalize_tool_names(&stored.enabled_tool_names, &defaults.tools);
        let tools = resolve_tools(&defaults.tools, &enabled_tool_names);
        Self {
            model: or_default(stored.model, &defaults.model),
            instructions: or_default(stored.instructions, &defaults.instructions),
            tools,
            enabled_tool_names,
            updated_at: stored.updated_at,
            source: ConfigSource::Stored,
            history: stored.history,
        }
    }

    fn snapshot(&self, updated_at: OffsetDateTime, reason: String) -> ConfigSnapshot {
        ConfigSnapshot {
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            enabled_tool_names: self.enabled_tool_names.clone(),
            updated_at,
            reason: Some(reason),
        }
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_owned()
    } else {
        value
    }
}

/// Trim names and drop the unknown ones. An empty result enables every
/// available tool.
#[must_use]
pub fn normalize_tool_names(names: &[String], available: &[ToolDefinition]) -> Vec<String> {
    let normalized: Vec<String> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && available.iter().any(|t| t.name == *name))
        .map(str::to_owned)
        .collect();

    if normalized.is_empty() {
        available.iter().map(|t| t.name.clone()).collect()
    } else {
        normalized
    }
}

/// The available tools whose names are enabled, in `available` order.
#[must_use]
pub fn resolve_tools(available: &[ToolDefinition], enabled: &[String]) -> Vec<ToolDefinition> {
    available
        .iter()
        .filter(|tool| enabled.contains(&tool.name))
        .cloned()
        .collect()
}

/// Where the tool loop reads its configuration from.
#[async_trait]
pub trait AgentConfigSource: Send + Sync {
    async fn current(&self) -> RuntimeAgentConfig;
}

#[async_trait]
impl AgentConfigSource for RuntimeAgentConfig {
    async fn current(&self) -> RuntimeAgentConfig {
        self.clone()
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Changes requested by an admin. Unset fields keep their current value.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdate {
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub enabled_tool_names: Option<Vec<String>>,
    pub updated_by: Option<String>,
    pub reason: Option<String>,
}

struct CachedConfig {
    value: RuntimeAgentConfig,
    expires_at: Instant,
}

/// Cached access to the runtime configuration.
///
/// Reads never fail: if the store cannot be read the defaults are served
/// (and cached for a shorter time). Updates are serialized so concurrent
/// admins cannot lose each other's history entries.
pub struct RuntimeConfigCache {
    defaults: AgentDefaults,
    store: Arc<dyn RuntimeConfigStore>,
    cached: RwLock<Option<CachedConfig>>,
    ttl: Duration,
    fallback_ttl: Duration,
    writes: KeyedMutex,
}

impl RuntimeConfigCache {
    #[must_use]
    pub fn new(defaults: AgentDefaults, store: Arc<dyn RuntimeConfigStore>) -> Self {
        Self {
            defaults,
            store,
            cached: RwLock::new(None),
            ttl: CONFIG_TTL,
            fallback_ttl: FALLBACK_TTL,
            writes: KeyedMutex::new(),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration, fallback_ttl: Duration) -> Self {
        self.ttl = ttl;
        self.fallback_ttl = fallback_ttl;
        self
    }

    /// Share a lock registry with other writers of the same store.
    #[must_use]
    pub fn with_write_lock(mut self, writes: KeyedMutex) -> Self {
        self.writes = writes;
        self
    }

    #[must_use]
    pub const fn defaults(&self) -> &AgentDefaults {
        &self.defaults
    }

    /// Current configuration, from cache unless expired or `force_refresh`.
    pub async fn get(&self, force_refresh: bool) -> RuntimeAgentConfig {
        if !force_refresh && let Some(value) = self.cached_value() {
            return value;
        }

        match self.store.load().await {
            Ok(stored) => {
                let value = RuntimeAgentConfig::from_stored(&self.defaults, stored);
                self.remember(value.clone(), self.ttl);
                value
            }
            Err(e) => {
                warn!("Failed to read runtime config, using defaults (error={e:#})");
                let value = RuntimeAgentConfig::from_defaults(&self.defaults);
                self.remember(value.clone(), self.fallback_ttl);
                value
            }
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = None;
        }
    }

    /// Apply `update` over the stored configuration and record the prior
    /// configuration in the history.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn update(&self, update: ConfigUpdate) -> Result<RuntimeAgentConfig> {
        self.writes
            .run_exclusive(CONFIG_WRITE_KEY, || self.apply_update(update))
            .await
    }

    /// Roll back to `target_model`, or to the most recent history snapshot
    /// when no model (or [`PREVIOUS_STABLE`]) is given. Without history the
    /// current configuration is returned unchanged.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn rollback(
        &self,
        target_model: Option<&str>,
        reason: Option<&str>,
    ) -> Result<RuntimeAgentConfig> {
        if let Some(model) = target_model.filter(|m| !m.is_empty() && *m != PREVIOUS_STABLE) {
            return self
                .update(ConfigUpdate {
                    model: Some(model.to_owned()),
                    reason: Some(reason.map_or_else(|| format!("rollback to {model}"), str::to_owned)),
                    updated_by: Some("admin-rollback".to_owned()),
                    ..ConfigUpdate::default()
                })
                .await;
        }

        let current = self.get(true).await;
        let Some(last) = current.history.last().cloned() else {
            return Ok(current);
        };

        self.update(ConfigUpdate {
            model: Some(last.model),
            instructions: Some(last.instructions),
            enabled_tool_names: Some(last.enabled_tool_names),
            reason: Some(
                reason.unwrap_or("rollback to previous stable config").to_owned(),
            ),
            updated_by: Some("admin-rollback".to_owned()),
        })
        .await
    }

    async fn apply_update(&self, update: ConfigUpdate) -> Result<RuntimeAgentConfig> {
        let current = RuntimeAgentConfig::from_stored(&self.defaults, self.store.load().await?);
        let now = OffsetDateTime::now_utc();

        let enabled_tool_names = normalize_tool_names(
            update
                .enabled_tool_names
                .as_deref()
                .unwrap_or(&current.enabled_tool_names),
            &self.defaults.tools,
        );
        let model = pick(update.model, &current.model, &self.defaults.model);
        let instructions = pick(
            update.instructions,
            &current.instructions,
            &self.defaults.instructions,
        );

        let reason = update
            .reason
            .unwrap_or_else(|| "runtime config update".to_owned());
        let mut history = current.history.clone();
        history.push(current.snapshot(now, reason));
        if history.len() > MAX_HISTORY_ITEMS {
            history.drain(..history.len() - MAX_HISTORY_ITEMS);
        }

        let stored = StoredRuntimeConfig {
            model,
            instructions,
            enabled_tool_names,
            history,
            updated_at: Some(now),
            updated_by: Some(update.updated_by.unwrap_or_else(|| "admin".to_owned())),
        };
        self.store
            .save(stored.clone())
            .await
            .context("failed to save runtime config")?;
        self.invalidate();

        Ok(RuntimeAgentConfig::from_stored(&self.defaults, Some(stored)))
    }

    fn cached_value(&self) -> Option<RuntimeAgentConfig> {
        let cached = self.cached.read().ok()?;
        cached
            .as_ref()
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.value.clone())
    }

    fn remember(&self, value: RuntimeAgentConfig, ttl: Duration) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(CachedConfig {
                value,
                expires_at: Instant::now() + ttl,
            });
        }
    }
}

#[async_trait]
impl AgentConfigSource for RuntimeConfigCache {
    async fn current(&self) -> RuntimeAgentConfig {
        self.get(false).await
    }
}

fn pick(requested: Option<String>, current: &str, default: &str) -> String {
    [requested.as_deref(), Some(current), Some(default)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_owned()
}
