//! In-memory adapter configuration repository

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::metadata::ProviderAdapterConfig;
use crate::context::Context;
use crate::repositories::{ConfigRepository, RepositoryError};

const ENTITY: &str = "adapter config";

/// Configuration store with a read-through cache keyed by identifier.
#[derive(Debug, Default)]
pub struct InMemoryConfigRepository {
    records: RwLock<HashMap<Uuid, ProviderAdapterConfig>>,
    cache: RwLock<HashMap<String, ProviderAdapterConfig>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository seeded with `configs`
    ///
    /// # Arguments
    ///
    /// * `configs` - Records to store; records without an id receive a fresh one
    ///
    /// # Returns
    ///
    /// Returns the repository, or a conflict error on a duplicate identifier
    pub fn with_configs<I>(configs: I) -> Result<Self, RepositoryError>
    where
        I: IntoIterator<Item = ProviderAdapterConfig>,
    {
        let repository = Self::new();
        for config in configs {
            repository.insert(config)?;
        }
        Ok(repository)
    }

    fn insert(&self, mut config: ProviderAdapterConfig) -> Result<ProviderAdapterConfig, RepositoryError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if records
            .values()
            .any(|existing| existing.identifier() == config.identifier())
        {
            return Err(RepositoryError::Conflict {
                entity: ENTITY,
                key: config.identifier().to_string(),
            });
        }
        let id = *config.id.get_or_insert_with(Uuid::new_v4);
        records.insert(id, config.clone());
        Ok(config)
    }

    fn find_by_identifier(&self, identifier: &str) -> Result<ProviderAdapterConfig, RepositoryError> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .find(|config| config.identifier() == identifier)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, identifier))
    }

    fn invalidate(&self, identifier: &str) {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(identifier);
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn get_by_id(
        &self,
        _ctx: &Context,
        id: Uuid,
    ) -> Result<ProviderAdapterConfig, RepositoryError> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id.to_string()))
    }

    async fn get_by_identifier(
        &self,
        _ctx: &Context,
        identifier: &str,
    ) -> Result<ProviderAdapterConfig, RepositoryError> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identifier)
        {
            return Ok(cached.clone());
        }
        let config = self.find_by_identifier(identifier)?;
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identifier.to_string(), config.clone());
        Ok(config)
    }

    async fn get_by_identifier_without_cache(
        &self,
        _ctx: &Context,
        identifier: &str,
    ) -> Result<ProviderAdapterConfig, RepositoryError> {
        self.find_by_identifier(identifier)
    }

    async fn list_configs(
        &self,
        _ctx: &Context,
    ) -> Result<Vec<ProviderAdapterConfig>, RepositoryError> {
        let mut configs: Vec<ProviderAdapterConfig> = self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        Ok(configs)
    }

    async fn create(
        &self,
        _ctx: &Context,
        config: ProviderAdapterConfig,
    ) -> Result<ProviderAdapterConfig, RepositoryError> {
        let created = self.insert(config)?;
        debug!(provider = %created.identifier(), "Created adapter config");
        Ok(created)
    }

    async fn update(
        &self,
        _ctx: &Context,
        config: ProviderAdapterConfig,
    ) -> Result<ProviderAdapterConfig, RepositoryError> {
        let Some(id) = config.id else {
            return Err(RepositoryError::not_found(ENTITY, config.identifier()));
        };
        let previous = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(slot) = records.get_mut(&id) else {
                return Err(RepositoryError::not_found(ENTITY, id.to_string()));
            };
            std::mem::replace(slot, config.clone())
        };
        self.invalidate(previous.identifier());
        self.invalidate(config.identifier());
        Ok(config)
    }

    async fn delete(&self, _ctx: &Context, id: Uuid) -> Result<(), RepositoryError> {
        let removed = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
            .ok_or_else(|| RepositoryError::not_found(ENTITY, id.to_string()))?;
        self.invalidate(removed.identifier());
        Ok(())
    }
}
