//! Adapter query service
//!
//! Read side of the runtime: assembles a provider's display record from
//! provider-core metadata, its configuration record and an optional
//! translation, and routes operation calls to the registered adapter.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::adapters::factory::{AdapterFactory, FactoryError};
use crate::adapters::metadata::ProviderAdapterInfo;
use crate::adapters::trait_::{Adapter, Credential};
use crate::context::Context;
use crate::error::AdapterError;
use crate::repositories::{ConfigRepository, ProviderCore, TranslationAcl};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("provider '{0}' not found")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Display record of a provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub info: ProviderAdapterInfo,
    /// Language the text was translated into, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Whether an adapter is currently registered for the provider
    pub loaded: bool,
}

pub struct AdapterService {
    factory: Arc<AdapterFactory>,
    configs: Arc<dyn ConfigRepository>,
    providers: Arc<dyn ProviderCore>,
    translations: Arc<dyn TranslationAcl>,
}

impl std::fmt::Debug for AdapterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterService")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

impl AdapterService {
    pub fn new(
        factory: Arc<AdapterFactory>,
        configs: Arc<dyn ConfigRepository>,
        providers: Arc<dyn ProviderCore>,
        translations: Arc<dyn TranslationAcl>,
    ) -> Self {
        Self {
            factory,
            configs,
            providers,
            translations,
        }
    }

    /// Provider display record, translated into `preferred_lang` (or the
    /// context locale) when a translation exists.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn get_provider_adapter_by_identifier(
        &self,
        ctx: &Context,
        provider_id: &str,
        preferred_lang: Option<&str>,
    ) -> Result<ProviderView, ServiceError> {
        let mut info = self
            .providers
            .get_data_without_translation(ctx, provider_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ServiceError::NotFound(provider_id.to_string())
                } else {
                    ServiceError::Internal(e.to_string())
                }
            })?;

        let config = self
            .configs
            .get_by_identifier(ctx, provider_id)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if info.icon_url.is_none() {
            info.icon_url = config.info.icon_url.clone();
        }
        if info.operations.is_empty() {
            info.operations = config.info.operations.clone();
        }
        info.permissions = config.info.permissions;

        let lang = preferred_lang
            .or_else(|| ctx.locale())
            .filter(|lang| !lang.is_empty());
        let mut applied = None;
        if let Some(lang) = lang {
            match self.translations.get_translation(ctx, provider_id, lang).await {
                Ok(translation) => {
                    translation.apply_to(&mut info);
                    applied = Some(lang.to_string());
                }
                Err(e) if e.is_not_found() => {
                    debug!(provider = %provider_id, %lang, "No translation available");
                }
                Err(e) => return Err(ServiceError::Internal(e.to_string())),
            }
        }

        Ok(ProviderView {
            loaded: self.factory.get_adapter(provider_id).is_ok(),
            info,
            lang: applied,
        })
    }

    /// Execute an operation on the registered adapter of `provider_id`.
    pub async fn execute(
        &self,
        ctx: &Context,
        provider_id: &str,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<Value, AdapterError> {
        let adapter = self.factory.get_adapter(provider_id).map_err(|e| {
            let status = match &e {
                FactoryError::NotRegistered { .. } => 404,
                FactoryError::CapabilityMismatch { .. } => 500,
            };
            AdapterError::internal(e.to_string())
                .with_status(status)
                .scoped(provider_id, operation_id)
        })?;
        adapter.execute(ctx, operation_id, params, credential).await
    }
}
