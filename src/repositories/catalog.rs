//! JSON catalogue file
//!
//! A single document holding provider metadata, adapter configuration records
//! and translations. The CLI reads it to populate the in-memory collaborators.
//!
//! ```json
//! {
//!   "providers": [{"identifier": "open_meteo", "name": "Open-Meteo", "auth_type": "none"}],
//!   "configs": [{"identifier": "open_meteo", "name": "Open-Meteo", "auth_type": "none"}],
//!   "translations": []
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::metadata::{ProviderAdapterConfig, ProviderAdapterInfo};
use crate::repositories::{
    InMemoryConfigRepository, InMemoryProviderCore, InMemoryTranslationAcl, ProviderTranslation,
    RepositoryError, TranslationAcl,
};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub providers: Vec<ProviderAdapterInfo>,
    #[serde(default)]
    pub configs: Vec<ProviderAdapterConfig>,
    #[serde(default)]
    pub translations: Vec<ProviderTranslation>,
}

/// In-memory collaborators built from a catalogue.
#[derive(Debug, Clone)]
pub struct CatalogRepositories {
    pub configs: Arc<InMemoryConfigRepository>,
    pub providers: Arc<InMemoryProviderCore>,
    pub translations: Arc<InMemoryTranslationAcl>,
}

impl Catalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog: Catalog = serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            path = %path.display(),
            providers = catalog.providers.len(),
            configs = catalog.configs.len(),
            translations = catalog.translations.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    pub fn into_repositories(self) -> Result<CatalogRepositories, CatalogError> {
        let translations = Arc::new(InMemoryTranslationAcl::with_translations(self.translations));
        let acl: Arc<dyn TranslationAcl> = translations.clone();
        let providers = Arc::new(InMemoryProviderCore::new(self.providers).with_translations(acl));
        let configs = Arc::new(InMemoryConfigRepository::with_configs(self.configs)?);
        Ok(CatalogRepositories {
            configs,
            providers,
            translations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::repositories::{ConfigRepository, ProviderCore};
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "providers": [{{"identifier": "amap", "name": "Amap", "auth_type": "apikey"}}],
                "configs": [{{"identifier": "amap", "name": "Amap", "auth_type": "apikey",
                              "custom_config": {{"timeout_seconds": 5}}}}],
                "translations": [{{"provider_id": "amap", "lang": "zh", "name": "高德"}}]
            }}"#
        )
        .unwrap();

        let repos = Catalog::from_path(file.path()).unwrap().into_repositories().unwrap();
        let ctx = Context::background();
        let config = repos.configs.get_by_identifier(&ctx, "amap").await.unwrap();
        assert!(config.id.is_some());
        let zh = repos.providers.get_provider_data(&ctx, "amap", Some("zh")).await.unwrap();
        assert_eq!(zh.name, "高德");
    }

    #[test]
    fn test_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            Catalog::from_path(file.path()),
            Err(CatalogError::Parse { .. })
        ));
        assert!(matches!(
            Catalog::from_path("/definitely/missing.json"),
            Err(CatalogError::Io { .. })
        ));
    }
}
