//! Loader service
//!
//! Coordinates batch and incremental loading of providers from the
//! provider-core metadata service and the configuration repository. Only one
//! load/reload runs at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::adapters::loader::{LoaderError, ProviderLoader};
use crate::adapters::metadata::ProviderAdapterConfig;
use crate::context::Context;
use crate::repositories::{ConfigRepository, ProviderCore, RepositoryError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read provider metadata: {0}")]
    Metadata(#[source] RepositoryError),

    #[error("failed to read adapter configuration: {0}")]
    Config(#[source] RepositoryError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("failed to reload providers: {}", .failed.join(", "))]
    Reload {
        reloaded: Vec<String>,
        failed: Vec<String>,
    },
}

/// Outcome of a batch load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Providers with metadata but no configuration record
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct LoaderService {
    loader: Arc<ProviderLoader>,
    configs: Arc<dyn ConfigRepository>,
    providers: Arc<dyn ProviderCore>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for LoaderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderService")
            .field("loaded", &self.loader.loaded_count())
            .finish()
    }
}

impl LoaderService {
    pub fn new(
        loader: Arc<ProviderLoader>,
        configs: Arc<dyn ConfigRepository>,
        providers: Arc<dyn ProviderCore>,
    ) -> Self {
        Self {
            loader,
            configs,
            providers,
            lock: Mutex::new(()),
        }
    }

    pub fn loader(&self) -> &Arc<ProviderLoader> {
        &self.loader
    }

    /// Load every provider that has both metadata and a configuration record.
    /// Individual failures are logged and the batch continues.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn load_all(&self, ctx: &Context) -> Result<LoadReport, LoadError> {
        let _guard = self.lock.lock().await;
        self.load_all_locked(ctx).await
    }

    /// Reload every currently loaded provider from fresh sources. Providers
    /// that were not loaded are left alone. Returns the reloaded identifiers,
    /// or `LoadError::Reload` when any provider failed.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn reload_all(&self, ctx: &Context) -> Result<Vec<String>, LoadError> {
        let _guard = self.lock.lock().await;
        let mut ids: Vec<String> = self
            .loader
            .get_loaded_providers()
            .into_iter()
            .map(|info| info.identifier)
            .collect();
        ids.sort();

        let mut reloaded = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            match self.reload_locked(ctx, &id).await {
                Ok(()) => reloaded.push(id),
                Err(_) => failed.push(id),
            }
        }

        info!(
            reloaded = reloaded.len(),
            failed = failed.len(),
            "Provider reload finished"
        );
        if failed.is_empty() {
            Ok(reloaded)
        } else {
            Err(LoadError::Reload { reloaded, failed })
        }
    }

    /// Unload, refetch and load one provider. Failures are returned to the caller.
    #[instrument(skip(self, ctx), fields(trace_id = %ctx.trace_id()))]
    pub async fn reload_provider(&self, ctx: &Context, provider_id: &str) -> Result<(), LoadError> {
        let _guard = self.lock.lock().await;
        self.reload_locked(ctx, provider_id).await
    }

    async fn reload_locked(&self, ctx: &Context, provider_id: &str) -> Result<(), LoadError> {
        self.loader.unload_provider(provider_id);

        let result = async {
            let metadata = self
                .providers
                .get_data_without_translation(ctx, provider_id)
                .await
                .map_err(LoadError::Metadata)?;
            let mut config = self
                .configs
                .get_by_identifier_without_cache(ctx, provider_id)
                .await
                .map_err(LoadError::Config)?;
            config.merge_metadata(&metadata);
            self.load_one(&config)?;
            Ok::<(), LoadError>(())
        }
        .await;

        result.inspect_err(|e| {
            error!(provider = %provider_id, error = %e, "Provider reload failed");
        })
    }

    async fn load_all_locked(&self, ctx: &Context) -> Result<LoadReport, LoadError> {
        let metadata = self
            .providers
            .list_providers(ctx)
            .await
            .map_err(LoadError::Metadata)?;
        let configs = self
            .configs
            .list_configs(ctx)
            .await
            .map_err(LoadError::Config)?;

        let mut by_identifier: HashMap<String, ProviderAdapterConfig> = configs
            .into_iter()
            .map(|config| (config.identifier().to_string(), config))
            .collect();

        let mut report = LoadReport::default();
        for info in metadata {
            let id = info.identifier.clone();
            let Some(mut config) = by_identifier.remove(&id) else {
                warn!(provider = %id, "No adapter configuration for provider, skipping");
                report.skipped.push(id);
                continue;
            };
            config.merge_metadata(&info);

            match self.load_one(&config) {
                Ok(()) => report.loaded.push(id),
                Err(e) => {
                    error!(provider = %id, error = %e, "Failed to load provider");
                    report.failed.push(id);
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Provider load finished"
        );
        Ok(report)
    }

    fn load_one(&self, config: &ProviderAdapterConfig) -> Result<(), LoaderError> {
        let labels = vec![("provider", config.identifier().to_string())];
        metrics::counter!("provider_loads_total", &labels).increment(1);
        self.loader.load_provider(config).inspect_err(|_| {
            metrics::counter!("provider_load_failures_total", &labels).increment(1);
        })
    }
}
