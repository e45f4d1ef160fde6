//! # Repository Layer
//!
//! Contracts of the external collaborators the runtime reads from: adapter
//! configuration records, provider-core metadata and translations. In-memory
//! implementations back the CLI (via [`catalog::Catalog`]) and the tests.

pub mod catalog;
pub mod config;
pub mod provider_core;
pub mod translation;

use async_trait::async_trait;
use uuid::Uuid;

use crate::adapters::metadata::{ProviderAdapterConfig, ProviderAdapterInfo};
use crate::context::Context;

pub use catalog::{Catalog, CatalogError, CatalogRepositories};
pub use config::InMemoryConfigRepository;
pub use provider_core::InMemoryProviderCore;
pub use translation::{InMemoryTranslationAcl, ProviderTranslation};

/// Error type for repository operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} '{key}' already exists")]
    Conflict { entity: &'static str, key: String },

    #[error("repository backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Source of adapter configuration records
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_by_id(
        &self,
        ctx: &Context,
        id: Uuid,
    ) -> Result<ProviderAdapterConfig, RepositoryError>;

    /// May serve a cached copy.
    async fn get_by_identifier(
        &self,
        ctx: &Context,
        identifier: &str,
    ) -> Result<ProviderAdapterConfig, RepositoryError>;

    /// Always reads the backing store.
    async fn get_by_identifier_without_cache(
        &self,
        ctx: &Context,
        identifier: &str,
    ) -> Result<ProviderAdapterConfig, RepositoryError>;

    async fn list_configs(&self, ctx: &Context)
    -> Result<Vec<ProviderAdapterConfig>, RepositoryError>;

    async fn create(
        &self,
        ctx: &Context,
        config: ProviderAdapterConfig,
    ) -> Result<ProviderAdapterConfig, RepositoryError>;

    async fn update(
        &self,
        ctx: &Context,
        config: ProviderAdapterConfig,
    ) -> Result<ProviderAdapterConfig, RepositoryError>;

    async fn delete(&self, ctx: &Context, id: Uuid) -> Result<(), RepositoryError>;
}

/// Provider-core metadata service
#[async_trait]
pub trait ProviderCore: Send + Sync {
    async fn list_providers(&self, ctx: &Context)
    -> Result<Vec<ProviderAdapterInfo>, RepositoryError>;

    /// Provider metadata, translated into `lang` when a translation exists.
    async fn get_provider_data(
        &self,
        ctx: &Context,
        provider_id: &str,
        lang: Option<&str>,
    ) -> Result<ProviderAdapterInfo, RepositoryError>;

    async fn get_data_without_translation(
        &self,
        ctx: &Context,
        provider_id: &str,
    ) -> Result<ProviderAdapterInfo, RepositoryError>;
}

/// Translation lookup
#[async_trait]
pub trait TranslationAcl: Send + Sync {
    async fn get_translation(
        &self,
        ctx: &Context,
        provider_id: &str,
        lang: &str,
    ) -> Result<ProviderTranslation, RepositoryError>;
}
