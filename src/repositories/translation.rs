//! Provider translations
//!
//! A translation overlays localized display text onto a provider's metadata.
//! Entries are matched by operation, parameter and permission identifier;
//! anything without a translated counterpart keeps its original text.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::adapters::metadata::ProviderAdapterInfo;
use crate::context::Context;
use crate::repositories::{RepositoryError, TranslationAcl};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationTranslation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Parameter name to translated description
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionTranslation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTranslation {
    pub provider_id: String,
    pub lang: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationTranslation>,
    #[serde(default)]
    pub permissions: BTreeMap<String, PermissionTranslation>,
}

impl ProviderTranslation {
    pub fn new(provider_id: &str, lang: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            lang: lang.to_string(),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, info: &mut ProviderAdapterInfo) {
        if let Some(name) = &self.name {
            info.name = name.clone();
        }
        if let Some(description) = &self.description {
            info.description = description.clone();
        }
        if let Some(categories) = &self.categories {
            info.categories = categories.clone();
        }

        for operation in &mut info.operations {
            let Some(translated) = self.operations.get(&operation.identifier) else {
                continue;
            };
            if let Some(name) = &translated.name {
                operation.name = name.clone();
            }
            if let Some(description) = &translated.description {
                operation.description = description.clone();
            }
            for parameter in &mut operation.parameters {
                if let Some(description) = translated.parameters.get(&parameter.name) {
                    parameter.description = description.clone();
                }
            }
        }

        for permission in &mut info.permissions {
            let Some(translated) = self.permissions.get(&permission.identifier) else {
                continue;
            };
            if let Some(name) = &translated.name {
                permission.name = name.clone();
            }
            if let Some(description) = &translated.description {
                permission.description = description.clone();
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTranslationAcl {
    entries: RwLock<HashMap<(String, String), ProviderTranslation>>,
}

impl InMemoryTranslationAcl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translations<I>(translations: I) -> Self
    where
        I: IntoIterator<Item = ProviderTranslation>,
    {
        let acl = Self::new();
        for translation in translations {
            acl.insert(translation);
        }
        acl
    }

    /// Insert or replace the translation for its `(provider_id, lang)` pair.
    pub fn insert(&self, translation: ProviderTranslation) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                (translation.provider_id.clone(), translation.lang.clone()),
                translation,
            );
    }
}

#[async_trait]
impl TranslationAcl for InMemoryTranslationAcl {
    async fn get_translation(
        &self,
        _ctx: &Context,
        provider_id: &str,
        lang: &str,
    ) -> Result<ProviderTranslation, RepositoryError> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(provider_id.to_string(), lang.to_string()))
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("translation", format!("{}/{}", provider_id, lang)))
    }
}
