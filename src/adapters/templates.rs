//! Adapter template registry
//!
//! A template knows how to validate a provider configuration record and turn
//! it into a constructed adapter. The registry maps provider identifiers to
//! templates; the composition root fills it explicitly at startup.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::adapters::metadata::{AuthType, ProviderAdapterConfig};
use crate::adapters::trait_::AdapterHandle;
use crate::error::AdapterError;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid configuration for '{provider}': {reason}")]
    InvalidConfig { provider: String, reason: String },

    #[error("failed to construct adapter: {0}")]
    Construction(#[from] AdapterError),
}

impl TemplateError {
    pub fn invalid(provider: &str, reason: impl Into<String>) -> Self {
        TemplateError::InvalidConfig {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }
}

/// Factory for one provider's adapter.
pub trait AdapterTemplate: Send + Sync {
    fn identifier(&self) -> &str;

    fn auth_type(&self) -> AuthType;

    fn validate_config(&self, config: &ProviderAdapterConfig) -> Result<(), TemplateError>;

    fn create_adapter(&self, config: &ProviderAdapterConfig)
    -> Result<AdapterHandle, TemplateError>;
}

/// Checks every template performs: identifier, auth variant and OAuth client
/// credentials when the template authenticates through OAuth.
pub fn validate_common(
    template: &dyn AdapterTemplate,
    config: &ProviderAdapterConfig,
) -> Result<(), TemplateError> {
    let id = template.identifier();
    if config.identifier() != id {
        return Err(TemplateError::invalid(
            id,
            format!("identifier mismatch: got '{}'", config.identifier()),
        ));
    }
    if config.info.auth_type != template.auth_type() {
        return Err(TemplateError::invalid(
            id,
            format!(
                "auth type mismatch: expected {}, got {}",
                template.auth_type(),
                config.info.auth_type
            ),
        ));
    }
    if template.auth_type() == AuthType::OAuth {
        match &config.oauth {
            Some(oauth) => oauth
                .validate()
                .map_err(|e| TemplateError::invalid(id, e.message))?,
            None => return Err(TemplateError::invalid(id, "missing oauth client configuration")),
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Arc<dyn AdapterTemplate>>>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.list_templates())
            .finish()
    }
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static Arc<TemplateRegistry> {
        static GLOBAL: OnceLock<Arc<TemplateRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(TemplateRegistry::new()))
    }

    /// Returns false and leaves the existing entry untouched when `id` is already registered.
    pub fn register_template(&self, id: &str, template: Arc<dyn AdapterTemplate>) -> bool {
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if templates.contains_key(id) {
            warn!(provider = %id, "Template already registered, ignoring");
            return false;
        }
        templates.insert(id.to_string(), template);
        debug!(provider = %id, "Registered adapter template");
        true
    }

    pub fn get_template(&self, id: &str) -> Option<Arc<dyn AdapterTemplate>> {
        self.templates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn list_templates(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .templates
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
    use crate::adapters::metadata::{OAuthConfig, ProviderAdapterInfo};

    struct Stub(&'static str, AuthType);

    impl AdapterTemplate for Stub {
        fn identifier(&self) -> &str {
            self.0
        }

        fn auth_type(&self) -> AuthType {
            self.1
        }

        fn validate_config(&self, config: &ProviderAdapterConfig) -> Result<(), TemplateError> {
            validate_common(self, config)
        }

        fn create_adapter(
            &self,
            _config: &ProviderAdapterConfig,
        ) -> Result<AdapterHandle, TemplateError> {
            Err(TemplateError::invalid(self.0, "stub"))
        }
    }

    #[test]
    fn test_registration_is_first_wins_and_sorted() {
        let registry = TemplateRegistry::new();
        assert!(registry.register_template("b", Arc::new(Stub("b", AuthType::None))));
        assert!(registry.register_template("a", Arc::new(Stub("a", AuthType::ApiKey))));
        assert!(!registry.register_template("a", Arc::new(Stub("a", AuthType::None))));

        assert_eq!(registry.list_templates(), vec!["a", "b"]);
        assert_eq!(registry.get_template("a").unwrap().auth_type(), AuthType::ApiKey);
        assert!(registry.get_template("zzz").is_none());
    }

    #[test]
    fn test_validate_common() {
        let template = Stub("gh", AuthType::OAuth);
        let mut config =
            ProviderAdapterConfig::new(ProviderAdapterInfo::new("gh", "GH", AuthType::OAuth));
        assert!(template.validate_config(&config).is_err());

        config.oauth = Some(OAuthConfig::new("id", ""));
        let err = template.validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("client_secret"));

        config.oauth = Some(OAuthConfig::new("id", "secret"));
        assert!(template.validate_config(&config).is_ok());

        config.info.auth_type = AuthType::ApiKey;
        assert!(template.validate_config(&config).is_err());

        config.info.auth_type = AuthType::OAuth;
        config.info.identifier = "other".into();
        assert!(template.validate_config(&config).is_err());
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(TemplateRegistry::global(), TemplateRegistry::global()));
    }
}
