//! Adapter factory
//!
//! Capability-typed storage of constructed adapters. Every adapter lives in one
//! map as a tagged [`AdapterHandle`]; the typed getters check the tag.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::adapters::trait_::{
    AdapterHandle, ApiKeyAdapter, BasicAuthAdapter, Capability, OAuthAdapter, PublicAdapter,
};

/// Error type for factory lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    #[error("provider '{provider}' is not registered")]
    NotRegistered { provider: String },

    #[error("provider '{provider}' does not support {expected} (registered as {actual})")]
    CapabilityMismatch {
        provider: String,
        expected: Capability,
        actual: Capability,
    },
}

#[derive(Debug, Default)]
pub struct AdapterFactory {
    adapters: RwLock<HashMap<String, AdapterHandle>>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the adapter for `provider_id`.
    pub fn register_adapter(&self, provider_id: &str, adapter: AdapterHandle) {
        let capability = adapter.capability();
        let replaced = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider_id.to_string(), adapter)
            .is_some();
        info!(provider = %provider_id, %capability, replaced, "Registered adapter");
    }

    pub fn get_adapter(&self, provider_id: &str) -> Result<AdapterHandle, FactoryError> {
        self.adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider_id)
            .cloned()
            .ok_or_else(|| FactoryError::NotRegistered {
                provider: provider_id.to_string(),
            })
    }

    fn typed<T>(
        &self,
        provider_id: &str,
        expected: Capability,
        pick: impl FnOnce(&AdapterHandle) -> Option<T>,
    ) -> Result<T, FactoryError> {
        let handle = self.get_adapter(provider_id)?;
        pick(&handle).ok_or_else(|| FactoryError::CapabilityMismatch {
            provider: provider_id.to_string(),
            expected,
            actual: handle.capability(),
        })
    }

    pub fn get_oauth_adapter(
        &self,
        provider_id: &str,
    ) -> Result<Arc<dyn OAuthAdapter>, FactoryError> {
        self.typed(provider_id, Capability::OAuth, AdapterHandle::as_oauth)
    }

    pub fn get_api_key_adapter(
        &self,
        provider_id: &str,
    ) -> Result<Arc<dyn ApiKeyAdapter>, FactoryError> {
        self.typed(provider_id, Capability::ApiKey, AdapterHandle::as_api_key)
    }

    pub fn get_basic_auth_adapter(
        &self,
        provider_id: &str,
    ) -> Result<Arc<dyn BasicAuthAdapter>, FactoryError> {
        self.typed(provider_id, Capability::BasicAuth, AdapterHandle::as_basic)
    }

    pub fn get_public_adapter(
        &self,
        provider_id: &str,
    ) -> Result<Arc<dyn PublicAdapter>, FactoryError> {
        self.typed(provider_id, Capability::Public, AdapterHandle::as_public)
    }

    /// Returns true when an adapter was removed.
    pub fn unregister_adapter(&self, provider_id: &str) -> bool {
        let removed = self
            .adapters
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(provider_id)
            .is_some();
        if removed {
            debug!(provider = %provider_id, "Unregistered adapter");
        }
        removed
    }

    /// Registered provider identifiers, sorted.
    pub fn list_registered_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .adapters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::base::AdapterDefaults;
    use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
    use crate::adapters::open_meteo::OpenMeteoAdapter;
    use crate::adapters::stripe::StripeAdapter;

    fn public_handle() -> AdapterHandle {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            "open_meteo",
            "Open-Meteo",
            AuthType::None,
        ));
        AdapterHandle::Public(Arc::new(
            OpenMeteoAdapter::new(&config, &AdapterDefaults::default()).unwrap(),
        ))
    }

    fn api_key_handle() -> AdapterHandle {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            "stripe",
            "Stripe",
            AuthType::ApiKey,
        ));
        AdapterHandle::ApiKey(Arc::new(
            StripeAdapter::new(&config, &AdapterDefaults::default()).unwrap(),
        ))
    }

    #[test]
    fn test_capability_partitioning() {
        let factory = AdapterFactory::new();
        factory.register_adapter("open_meteo", public_handle());
        factory.register_adapter("stripe", api_key_handle());

        assert!(factory.get_public_adapter("open_meteo").is_ok());
        assert!(factory.get_api_key_adapter("stripe").is_ok());

        let err = factory.get_oauth_adapter("stripe").err().unwrap();
        assert_eq!(
            err,
            FactoryError::CapabilityMismatch {
                provider: "stripe".into(),
                expected: Capability::OAuth,
                actual: Capability::ApiKey,
            }
        );
        assert!(matches!(
            factory.get_basic_auth_adapter("missing").err().unwrap(),
            FactoryError::NotRegistered { .. }
        ));
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let factory = AdapterFactory::new();
        let first = public_handle();
        let second = public_handle();
        factory.register_adapter("open_meteo", first.clone());
        factory.register_adapter("open_meteo", second.clone());

        let current = factory.get_adapter("open_meteo").unwrap();
        assert!(current.ptr_eq(&second));
        assert!(!current.ptr_eq(&first));

        factory.register_adapter("stripe", api_key_handle());
        assert_eq!(factory.list_registered_providers(), vec!["open_meteo", "stripe"]);

        assert!(factory.unregister_adapter("open_meteo"));
        assert!(!factory.unregister_adapter("open_meteo"));
        assert!(factory.get_adapter("open_meteo").is_err());
    }
}
