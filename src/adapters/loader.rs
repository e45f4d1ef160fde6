//! Provider loader
//!
//! Turns configuration records into registered adapters:
//! template lookup, config validation, construction, factory registration.
//! The loader also remembers the info of every provider it loaded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::factory::AdapterFactory;
use crate::adapters::metadata::{ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::templates::{TemplateError, TemplateRegistry};
use crate::adapters::trait_::Adapter;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("no template registered for provider '{0}'")]
    TemplateNotFound(String),

    #[error("provider '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("invalid configuration for provider '{provider}': {source}")]
    InvalidConfig {
        provider: String,
        #[source]
        source: TemplateError,
    },

    #[error("failed to construct adapter for provider '{provider}': {source}")]
    Construction {
        provider: String,
        #[source]
        source: TemplateError,
    },
}

#[derive(Debug)]
pub struct ProviderLoader {
    templates: Arc<TemplateRegistry>,
    factory: Arc<AdapterFactory>,
    loaded: RwLock<HashMap<String, ProviderAdapterInfo>>,
}

impl ProviderLoader {
    pub fn new(templates: Arc<TemplateRegistry>, factory: Arc<AdapterFactory>) -> Self {
        Self {
            templates,
            factory,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Arc<AdapterFactory> {
        &self.factory
    }

    /// Validate, construct and register the adapter described by `config`.
    #[instrument(skip(self, config), fields(provider = %config.identifier()))]
    pub fn load_provider(&self, config: &ProviderAdapterConfig) -> Result<(), LoaderError> {
        let id = config.identifier().to_string();
        let template = self
            .templates
            .get_template(&id)
            .ok_or_else(|| LoaderError::TemplateNotFound(id.clone()))?;

        // exclusive for the whole load so concurrent loads of one id cannot both succeed
        let mut loaded = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if loaded.contains_key(&id) {
            return Err(LoaderError::AlreadyLoaded(id));
        }

        template
            .validate_config(config)
            .map_err(|source| LoaderError::InvalidConfig {
                provider: id.clone(),
                source,
            })?;
        let adapter = template
            .create_adapter(config)
            .map_err(|source| LoaderError::Construction {
                provider: id.clone(),
                source,
            })?;

        let info = adapter.info().clone();
        self.factory.register_adapter(&id, adapter);
        loaded.insert(id.clone(), info);
        info!(provider = %id, "Provider loaded");
        Ok(())
    }

    /// Returns false when the provider was not loaded.
    pub fn unload_provider(&self, provider_id: &str) -> bool {
        let mut loaded = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if loaded.remove(provider_id).is_none() {
            warn!(provider = %provider_id, "Unload requested for provider that is not loaded");
            return false;
        }
        self.factory.unregister_adapter(provider_id);
        info!(provider = %provider_id, "Provider unloaded");
        true
    }

    /// Info of every loaded provider, sorted by identifier.
    pub fn get_loaded_providers(&self) -> Vec<ProviderAdapterInfo> {
        let mut providers: Vec<ProviderAdapterInfo> = self
            .loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        providers
    }

    pub fn is_provider_loaded(&self, provider_id: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(provider_id)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
