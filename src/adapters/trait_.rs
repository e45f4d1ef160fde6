//! Adapter trait definitions
//!
//! The polymorphic operation-execution contract every provider adapter
//! implements, its capability extensions, and the tagged handle the factory stores.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

use crate::adapters::metadata::ProviderAdapterInfo;
use crate::context::Context;
use crate::error::AdapterError;

/// OAuth token pair with optional expiry
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: None,
            expiry: None,
        }
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Credential supplied by the caller on every execute
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    #[serde(rename = "oauth")]
    OAuth {
        token: OAuthToken,
        #[serde(default)]
        scopes: Vec<String>,
    },
    ApiKey {
        api_key: String,
    },
    Basic {
        username: String,
        password: String,
    },
    None,
}

impl Credential {
    pub fn oauth(access_token: &str, scopes: &[&str]) -> Self {
        Credential::OAuth {
            token: OAuthToken::new(access_token),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn api_key(key: &str) -> Self {
        Credential::ApiKey {
            api_key: key.to_string(),
        }
    }

    pub fn basic(username: &str, password: &str) -> Self {
        Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::OAuth { .. } => "oauth",
            Credential::ApiKey { .. } => "api_key",
            Credential::Basic { .. } => "basic",
            Credential::None => "none",
        }
    }

    /// Caller identity used to partition rate limits. Secrets are hashed.
    pub fn subject(&self) -> String {
        let secret = match self {
            Credential::OAuth { token, .. } => token.access_token.as_str(),
            Credential::ApiKey { api_key } => api_key.as_str(),
            Credential::Basic { username, .. } => return format!("basic:{}", username),
            Credential::None => return "anonymous".to_string(),
        };
        let digest = Sha256::digest(secret.as_bytes());
        format!("{}:{}", self.kind(), URL_SAFE_NO_PAD.encode(&digest[..12]))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::OAuth { token, scopes } => f
                .debug_struct("OAuth")
                .field("token", token)
                .field("scopes", scopes)
                .finish(),
            Credential::ApiKey { .. } => f.write_str("ApiKey([REDACTED])"),
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credential::None => f.write_str("None"),
        }
    }
}

/// Operation-execution contract shared by every adapter
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider description, including the registered operations
    fn info(&self) -> &ProviderAdapterInfo;

    /// Execute `operation_id` with an untyped parameter map
    async fn execute(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<Value, AdapterError>;
}

/// Adapters authenticating through OAuth 2.0
#[async_trait]
pub trait OAuthAdapter: Adapter {
    /// True when the token expires within the refresh window
    fn should_refresh_token(&self, token: &OAuthToken) -> bool;

    async fn refresh_oauth_token(
        &self,
        ctx: &Context,
        token: &OAuthToken,
    ) -> Result<OAuthToken, AdapterError>;

    /// Build the provider's authorization URL; `code_challenge` enables PKCE
    fn generate_oauth_url(
        &self,
        redirect_uri: &str,
        state: &str,
        scopes: &[String],
        code_challenge: Option<&str>,
    ) -> Result<Url, AdapterError>;

    async fn exchange_code_for_tokens(
        &self,
        ctx: &Context,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthToken, AdapterError>;

    /// `(all_present, missing_permission_ids)` for an operation
    fn check_missing_permissions(
        &self,
        operation_id: &str,
        authorized_scopes: &[String],
    ) -> Result<(bool, BTreeSet<String>), AdapterError>;

    fn get_scopes_from_permissions(&self, permission_ids: &[String]) -> BTreeSet<String>;

    fn get_permission_ids_from_scopes(&self, scopes: &[String]) -> BTreeSet<String>;
}

/// Adapters authenticating with a static API key
pub trait ApiKeyAdapter: Adapter {}

/// Adapters authenticating with HTTP basic credentials
#[async_trait]
pub trait BasicAuthAdapter: Adapter {
    /// Verify a username/password pair against the provider
    async fn validate_basic_auth(
        &self,
        ctx: &Context,
        username: &str,
        password: &str,
    ) -> Result<(), AdapterError>;
}

/// Adapters for public endpoints
pub trait PublicAdapter: Adapter {}

/// Capability of a registered adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[serde(rename = "oauth")]
    OAuth,
    ApiKey,
    BasicAuth,
    Public,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::OAuth => "oauth",
            Capability::ApiKey => "api_key",
            Capability::BasicAuth => "basic_auth",
            Capability::Public => "public",
        };
        f.write_str(name)
    }
}

/// Adapter tagged with its capability
#[derive(Clone)]
pub enum AdapterHandle {
    OAuth(Arc<dyn OAuthAdapter>),
    ApiKey(Arc<dyn ApiKeyAdapter>),
    Basic(Arc<dyn BasicAuthAdapter>),
    Public(Arc<dyn PublicAdapter>),
}

impl AdapterHandle {
    pub fn capability(&self) -> Capability {
        match self {
            AdapterHandle::OAuth(_) => Capability::OAuth,
            AdapterHandle::ApiKey(_) => Capability::ApiKey,
            AdapterHandle::Basic(_) => Capability::BasicAuth,
            AdapterHandle::Public(_) => Capability::Public,
        }
    }

    pub fn as_oauth(&self) -> Option<Arc<dyn OAuthAdapter>> {
        match self {
            AdapterHandle::OAuth(adapter) => Some(Arc::clone(adapter)),
            _ => None,
        }
    }

    pub fn as_api_key(&self) -> Option<Arc<dyn ApiKeyAdapter>> {
        match self {
            AdapterHandle::ApiKey(adapter) => Some(Arc::clone(adapter)),
            _ => None,
        }
    }

    pub fn as_basic(&self) -> Option<Arc<dyn BasicAuthAdapter>> {
        match self {
            AdapterHandle::Basic(adapter) => Some(Arc::clone(adapter)),
            _ => None,
        }
    }

    pub fn as_public(&self) -> Option<Arc<dyn PublicAdapter>> {
        match self {
            AdapterHandle::Public(adapter) => Some(Arc::clone(adapter)),
            _ => None,
        }
    }

    /// True when both handles point at the same adapter instance.
    pub fn ptr_eq(&self, other: &AdapterHandle) -> bool {
        match (self, other) {
            (AdapterHandle::OAuth(a), AdapterHandle::OAuth(b)) => Arc::ptr_eq(a, b),
            (AdapterHandle::ApiKey(a), AdapterHandle::ApiKey(b)) => Arc::ptr_eq(a, b),
            (AdapterHandle::Basic(a), AdapterHandle::Basic(b)) => Arc::ptr_eq(a, b),
            (AdapterHandle::Public(a), AdapterHandle::Public(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("provider", &self.info().identifier)
            .field("capability", &self.capability())
            .finish()
    }
}

#[async_trait]
impl Adapter for AdapterHandle {
    fn info(&self) -> &ProviderAdapterInfo {
        match self {
            AdapterHandle::OAuth(adapter) => adapter.info(),
            AdapterHandle::ApiKey(adapter) => adapter.info(),
            AdapterHandle::Basic(adapter) => adapter.info(),
            AdapterHandle::Public(adapter) => adapter.info(),
        }
    }

    async fn execute(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<Value, AdapterError> {
        match self {
            AdapterHandle::OAuth(adapter) => {
                adapter.execute(ctx, operation_id, params, credential).await
            }
            AdapterHandle::ApiKey(adapter) => {
                adapter.execute(ctx, operation_id, params, credential).await
            }
            AdapterHandle::Basic(adapter) => {
                adapter.execute(ctx, operation_id, params, credential).await
            }
            AdapterHandle::Public(adapter) => {
                adapter.execute(ctx, operation_id, params, credential).await
            }
        }
    }
}
