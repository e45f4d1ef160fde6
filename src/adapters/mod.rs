//! Provider adapters
//!
//! Contract, shared scaffolding, concrete providers, and the template, factory
//! and loader machinery that turns configuration records into live adapters.

pub mod airtable;
pub mod amap;
pub mod base;
pub mod factory;
pub mod github;
pub mod loader;
pub mod metadata;
pub mod oauth;
pub mod open_meteo;
pub mod stripe;
pub mod templates;
pub mod trait_;
pub mod twilio;

use std::sync::Arc;

pub use base::{AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec};
pub use factory::{AdapterFactory, FactoryError};
pub use loader::{LoaderError, ProviderLoader};
pub use metadata::{
    AuthType, OAuthConfig, OperationDescriptor, ParameterDescriptor, ProviderAdapterConfig,
    ProviderAdapterInfo, ProviderStatus,
};
pub use templates::{AdapterTemplate, TemplateError, TemplateRegistry};
pub use trait_::{
    Adapter, AdapterHandle, ApiKeyAdapter, BasicAuthAdapter, Capability, Credential,
    OAuthAdapter, OAuthToken, PublicAdapter,
};

/// Register the template of every built-in provider. Returns how many were newly registered.
pub fn register_builtin_templates(registry: &TemplateRegistry, defaults: &AdapterDefaults) -> usize {
    let templates: Vec<Arc<dyn AdapterTemplate>> = vec![
        Arc::new(airtable::AirtableTemplate::new(defaults.clone())),
        Arc::new(amap::AmapTemplate::new(defaults.clone())),
        Arc::new(github::GitHubTemplate::new(defaults.clone())),
        Arc::new(open_meteo::OpenMeteoTemplate::new(defaults.clone())),
        Arc::new(stripe::StripeTemplate::new(defaults.clone())),
        Arc::new(twilio::TwilioTemplate::new(defaults.clone())),
    ];

    templates
        .into_iter()
        .filter(|template| {
            let id = template.identifier().to_string();
            registry.register_template(&id, Arc::clone(template))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates() {
        let registry = TemplateRegistry::new();
        assert_eq!(register_builtin_templates(&registry, &AdapterDefaults::default()), 6);
        assert_eq!(
            registry.list_templates(),
            vec!["airtable", "amap", "github", "open_meteo", "stripe", "twilio"]
        );
        assert_eq!(register_builtin_templates(&registry, &AdapterDefaults::default()), 0);
    }
}
