//! Storage for the runtime agent configuration.
//!
//! The tutor keeps one configuration document (model, instructions, enabled
//! tools and change history) in an external document store. Implement
//! [`RuntimeConfigStore`] for that backend; [`InMemoryConfigStore`] is
//! suitable for tests and single-process deployments.

use crate::config::StoredRuntimeConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::RwLock;

/// Persistence for the runtime configuration document.
#[async_trait]
pub trait RuntimeConfigStore: Send + Sync {
    /// Load the stored configuration, `None` if none was ever saved.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read.
    async fn load(&self) -> Result<Option<StoredRuntimeConfig>>;

    /// Replace the stored configuration.
    ///
    /// # Errors
    /// Returns an error if the document cannot be written.
    async fn save(&self, config: StoredRuntimeConfig) -> Result<()>;
}

/// In-memory implementation of [`RuntimeConfigStore`].
#[derive(Default)]
pub struct InMemoryConfigStore {
    config: RwLock<Option<StoredRuntimeConfig>>,
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: StoredRuntimeConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
        }
    }
}

#[async_trait]
impl RuntimeConfigStore for InMemoryConfigStore {
    async fn load(&self) -> Result<Option<StoredRuntimeConfig>> {
        let config = self.config.read().ok().context("lock poisoned")?;
        Ok(config.clone())
    }

    async fn save(&self, config: StoredRuntimeConfig) -> Result<()> {
        *self.config.write().ok().context("lock poisoned")? = Some(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_config_store() -> Result<()> {
        let store = InMemoryConfigStore::new();
        assert!(store.load().await?.is_none());

        let config = StoredRuntimeConfig {
            model: "gpt-4.1".to_owned(),
            instructions: "Be brief.".to_owned(),
            ..StoredRuntimeConfig::default()
        };
        store.save(config.clone()).await?;
        assert_eq!(store.load().await?, Some(config));

        let replaced = StoredRuntimeConfig {
            model: "gpt-4.1-mini".to_owned(),
            ..StoredRuntimeConfig::default()
        };
        store.save(replaced).await?;
        let loaded = store.load().await?.map(|c| c.model);
        assert_eq!(loaded.as_deref(), Some("gpt-4.1-mini"));
        Ok(())
    }
}
