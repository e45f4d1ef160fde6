//! Provider adapter metadata types
//!
//! Descriptors shared by the adapters, the loader and the query service.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdapterError;
use crate::params::ParamType;
use crate::permissions::Permission;

/// Authentication variant of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// No authentication
    None,
    /// Static API key
    ApiKey,
    /// OAuth 2.0 authorization code flow
    OAuth,
    /// HTTP basic authentication
    Basic,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthType::None => "none",
            AuthType::ApiKey => "apikey",
            AuthType::OAuth => "oauth",
            AuthType::Basic => "basic",
        };
        f.write_str(name)
    }
}

/// Lifecycle status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Deprecated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    /// Permission identifiers the caller must hold
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

/// Public description of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAdapterInfo {
    /// Stable identifier, unique across the catalogue
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub auth_type: AuthType,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default)]
    pub operations: Vec<OperationDescriptor>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl ProviderAdapterInfo {
    pub fn new(identifier: &str, name: &str, auth_type: AuthType) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            description: String::new(),
            auth_type,
            status: ProviderStatus::Active,
            operations: Vec::new(),
            permissions: Vec::new(),
            icon_url: None,
            categories: Vec::new(),
        }
    }

    pub fn operation(&self, identifier: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.identifier == identifier)
    }
}

/// OAuth client credentials of a provider
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthConfig {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.client_id.trim().is_empty() {
            return Err(AdapterError::missing_field("oauth.client_id"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AdapterError::missing_field("oauth.client_secret"));
        }
        Ok(())
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Configuration record consumed by a template to build an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAdapterConfig {
    /// Repository record id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<uuid::Uuid>,
    #[serde(flatten)]
    pub info: ProviderAdapterInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
    #[serde(default)]
    pub custom_config: Map<String, Value>,
}

impl ProviderAdapterConfig {
    pub fn new(info: ProviderAdapterInfo) -> Self {
        Self {
            id: None,
            info,
            oauth: None,
            custom_config: Map::new(),
        }
    }

    pub fn with_oauth(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = Some(oauth);
        self
    }

    pub fn with_custom(mut self, key: &str, value: Value) -> Self {
        self.custom_config.insert(key.to_string(), value);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom_config.get(key).and_then(Value::as_str)
    }

    /// Overlay provider-core metadata onto this configuration record.
    pub fn merge_metadata(&mut self, metadata: &ProviderAdapterInfo) {
        self.info.name = metadata.name.clone();
        self.info.description = metadata.description.clone();
        self.info.status = metadata.status;
        self.info.auth_type = metadata.auth_type;
        self.info.permissions = metadata.permissions.clone();
        self.info.operations = metadata.operations.clone();
        if metadata.icon_url.is_some() {
            self.info.icon_url = metadata.icon_url.clone();
        }
        if !metadata.categories.is_empty() {
            self.info.categories = metadata.categories.clone();
        }
    }
}
