//! In-memory provider-core metadata service

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::metadata::ProviderAdapterInfo;
use crate::context::Context;
use crate::repositories::{ProviderCore, RepositoryError, TranslationAcl};

const ENTITY: &str = "provider";

#[derive(Default)]
pub struct InMemoryProviderCore {
    providers: RwLock<BTreeMap<String, ProviderAdapterInfo>>,
    translations: Option<Arc<dyn TranslationAcl>>,
}

impl std::fmt::Debug for InMemoryProviderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProviderCore")
            .field("providers", &self.len())
            .field("translations", &self.translations.is_some())
            .finish()
    }
}

impl InMemoryProviderCore {
    pub fn new<I>(providers: I) -> Self
    where
        I: IntoIterator<Item = ProviderAdapterInfo>,
    {
        Self {
            providers: RwLock::new(
                providers
                    .into_iter()
                    .map(|info| (info.identifier.clone(), info))
                    .collect(),
            ),
            translations: None,
        }
    }

    /// Serve translated data from `translations` in `get_provider_data`.
    pub fn with_translations(mut self, translations: Arc<dyn TranslationAcl>) -> Self {
        self.translations = Some(translations);
        self
    }

    /// Insert or replace a provider record.
    pub fn upsert(&self, info: ProviderAdapterInfo) {
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(info.identifier.clone(), info);
    }

    pub fn remove(&self, provider_id: &str) -> bool {
        self.providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(provider_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, provider_id: &str) -> Result<ProviderAdapterInfo, RepositoryError> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(ENTITY, provider_id))
    }
}

#[async_trait]
impl ProviderCore for InMemoryProviderCore {
    async fn list_providers(
        &self,
        _ctx: &Context,
    ) -> Result<Vec<ProviderAdapterInfo>, RepositoryError> {
        Ok(self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn get_provider_data(
        &self,
        ctx: &Context,
        provider_id: &str,
        lang: Option<&str>,
    ) -> Result<ProviderAdapterInfo, RepositoryError> {
        let mut info = self.lookup(provider_id)?;
        if let (Some(lang), Some(translations)) = (lang, &self.translations) {
            match translations.get_translation(ctx, provider_id, lang).await {
                Ok(translation) => translation.apply_to(&mut info),
                Err(e) if e.is_not_found() => {
                    debug!(provider = %provider_id, %lang, "No translation, serving original text");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(info)
    }

    async fn get_data_without_translation(
        &self,
        _ctx: &Context,
        provider_id: &str,
    ) -> Result<ProviderAdapterInfo, RepositoryError> {
        self.lookup(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::metadata::AuthType;
    use crate::repositories::{InMemoryTranslationAcl, ProviderTranslation};

    #[tokio::test]
    async fn test_translated_and_raw_reads() {
        let mut translation = ProviderTranslation::new("stripe", "de");
        translation.description = Some("Zahlungen".into());
        let acl = Arc::new(InMemoryTranslationAcl::with_translations([translation]));

        let core = InMemoryProviderCore::new([
            ProviderAdapterInfo::new("stripe", "Stripe", AuthType::ApiKey),
            ProviderAdapterInfo::new("amap", "Amap", AuthType::ApiKey),
        ])
        .with_translations(acl);
        let ctx = Context::background();

        let ids: Vec<String> = core
            .list_providers(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.identifier)
            .collect();
        assert_eq!(ids, vec!["amap", "stripe"]);

        let de = core.get_provider_data(&ctx, "stripe", Some("de")).await.unwrap();
        assert_eq!(de.description, "Zahlungen");
        let fr = core.get_provider_data(&ctx, "stripe", Some("fr")).await.unwrap();
        assert_eq!(fr.description, "");
        let raw = core.get_data_without_translation(&ctx, "stripe").await.unwrap();
        assert_eq!(raw.description, "");

        assert!(core.get_provider_data(&ctx, "nope", None).await.unwrap_err().is_not_found());
    }
}
