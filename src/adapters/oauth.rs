//! OAuth 2.0 authorization-code flow shared by the OAuth adapters.
//!
//! 1. Optionally generate a PKCE verifier and derive its S256 challenge.
//! 2. Send the user to [`OAuthFlow::authorization_url`].
//! 3. Exchange the returned code (plus verifier) for tokens.
//! 4. Refresh tokens that are about to expire.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthType as TokenAuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet,
    EndpointSet, PkceCodeVerifier, RedirectUrl, RefreshToken, TokenResponse, TokenUrl,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::adapters::metadata::OAuthConfig;
use crate::adapters::trait_::OAuthToken;
use crate::context::Context;
use crate::error::AdapterError;

/// Tokens expiring within this window are refreshed.
pub const REFRESH_WINDOW_MINUTES: i64 = 30;

/// Length of the PKCE code verifier in bytes before encoding.
const PKCE_VERIFIER_BYTES: usize = 32;

type TokenClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthStyle {
    /// `client_id` and `client_secret` in the form body
    RequestBody,
    /// `Authorization: Basic base64(client_id:client_secret)`
    BasicHeader,
}

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub auth_style: ClientAuthStyle,
}

#[derive(Debug, Clone)]
pub struct OAuthFlow {
    provider_id: String,
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
    http: reqwest::Client,
}

impl OAuthFlow {
    pub fn new(
        provider_id: &str,
        config: &OAuthConfig,
        endpoints: OAuthEndpoints,
    ) -> Result<Self, AdapterError> {
        config.validate().map_err(|e| e.for_provider(provider_id))?;
        let http = reqwest::Client::builder()
            // token endpoints must not redirect
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AdapterError::internal(format!("failed to build OAuth client: {}", e)))?;
        Ok(Self {
            provider_id: provider_id.to_string(),
            config: config.clone(),
            endpoints,
            http,
        })
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// True iff the token carries an expiry within the refresh window.
    pub fn should_refresh_token(token: &OAuthToken) -> bool {
        match token.expiry {
            Some(expiry) => expiry - Utc::now() < ChronoDuration::minutes(REFRESH_WINDOW_MINUTES),
            None => false,
        }
    }

    /// `response_type=code&client_id&redirect_uri&state&scope`, plus the S256
    /// challenge when `code_challenge` is given.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        scopes: &[String],
        code_challenge: Option<&str>,
    ) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.endpoints.authorize_url).map_err(|e| {
            AdapterError::internal(format!(
                "invalid authorize URL '{}': {}",
                self.endpoints.authorize_url, e
            ))
        })?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("state", state);
            params.append_pair("scope", &scopes.join(" "));
            if let Some(challenge) = code_challenge.filter(|c| !c.is_empty()) {
                params.append_pair("code_challenge", challenge);
                params.append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    fn client(&self, redirect_uri: Option<&str>) -> Result<TokenClient, AdapterError> {
        let auth_url = AuthUrl::new(self.endpoints.authorize_url.clone())
            .map_err(|e| AdapterError::internal(format!("invalid authorize URL: {}", e)))?;
        let token_url = TokenUrl::new(self.endpoints.token_url.clone())
            .map_err(|e| AdapterError::internal(format!("invalid token URL: {}", e)))?;
        let auth_type = match self.endpoints.auth_style {
            ClientAuthStyle::RequestBody => TokenAuthType::RequestBody,
            ClientAuthStyle::BasicHeader => TokenAuthType::BasicAuth,
        };

        let mut client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_auth_type(auth_type);
        if let Some(redirect_uri) = redirect_uri {
            let redirect = RedirectUrl::new(redirect_uri.to_string()).map_err(|e| {
                AdapterError::credential(format!("invalid redirect URI: {}", e)).with_status(400)
            })?;
            client = client.set_redirect_uri(redirect);
        }
        Ok(client)
    }

    /// Exchange an authorization code; `code_verifier` is sent when provided.
    pub async fn exchange_code(
        &self,
        ctx: &Context,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthToken, AdapterError> {
        let client = self.client(Some(redirect_uri))?;
        let mut request = client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = code_verifier.filter(|v| !v.is_empty()) {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        debug!(provider = %self.provider_id, token_url = %self.endpoints.token_url, "Exchanging authorization code");
        let response = tokio::select! {
            _ = ctx.done() => return Err(self.cancelled("code exchange")),
            response = request.request_async(&self.http) => response,
        }
        .map_err(|e| {
            warn!(provider = %self.provider_id, error = %e, "Authorization code exchange failed");
            AdapterError::credential(format!("authorization code exchange failed: {}", e))
                .with_status(500)
                .for_provider(&self.provider_id)
        })?;

        Ok(token_from_response(&response, None))
    }

    /// Refresh `token`, keeping its refresh token when the provider does not issue a new one.
    pub async fn refresh(
        &self,
        ctx: &Context,
        token: &OAuthToken,
    ) -> Result<OAuthToken, AdapterError> {
        let Some(refresh_token) = token.refresh_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(
                AdapterError::credential("no refresh token available")
                    .with_status(500)
                    .for_provider(&self.provider_id),
            );
        };

        let client = self.client(None)?;
        let refresh = RefreshToken::new(refresh_token.to_string());
        let request = client.exchange_refresh_token(&refresh);

        debug!(provider = %self.provider_id, "Refreshing OAuth token");
        let response = tokio::select! {
            _ = ctx.done() => return Err(self.cancelled("token refresh")),
            response = request.request_async(&self.http) => response,
        }
        .map_err(|e| {
            warn!(provider = %self.provider_id, error = %e, "Token refresh failed");
            AdapterError::credential(format!("token refresh failed: {}", e))
                .with_status(500)
                .for_provider(&self.provider_id)
        })?;

        Ok(token_from_response(&response, Some(refresh_token)))
    }

    fn cancelled(&self, what: &str) -> AdapterError {
        AdapterError::timeout(format!("{} cancelled", what)).for_provider(&self.provider_id)
    }
}

fn token_from_response(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> OAuthToken {
    OAuthToken {
        access_token: response.access_token().secret().clone(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string)),
        expiry: response
            .expires_in()
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| Utc::now() + d),
    }
}

/// PKCE verifier with its derived S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Random 32-byte verifier, base64url encoded without padding.
pub fn generate_pkce_pair() -> PkcePair {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = pkce_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// `BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> OAuthFlow {
        OAuthFlow::new(
            "airtable",
            &OAuthConfig::new("client-1", "secret-1"),
            OAuthEndpoints {
                authorize_url: "https://auth.example.com/authorize".into(),
                token_url: "https://auth.example.com/token".into(),
                auth_style: ClientAuthStyle::BasicHeader,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_empty_client_credentials() {
        let err = OAuthFlow::new(
            "x",
            &OAuthConfig::new("", "s"),
            OAuthEndpoints {
                authorize_url: "https://a".into(),
                token_url: "https://t".into(),
                auth_style: ClientAuthStyle::RequestBody,
            },
        )
        .unwrap_err();
        assert_eq!(err.provider_id, "x");
    }

    #[test]
    fn test_should_refresh_token_window() {
        let mut token = OAuthToken::new("a");
        assert!(!OAuthFlow::should_refresh_token(&token));

        token.expiry = Some(Utc::now() + ChronoDuration::minutes(10));
        assert!(OAuthFlow::should_refresh_token(&token));

        token.expiry = Some(Utc::now() + ChronoDuration::hours(2));
        assert!(!OAuthFlow::should_refresh_token(&token));

        token.expiry = Some(Utc::now() - ChronoDuration::minutes(1));
        assert!(OAuthFlow::should_refresh_token(&token));
    }

    #[test]
    fn test_authorization_url_parameter_order() {
        let scopes = vec!["data.records:read".to_string(), "schema.bases:read".to_string()];
        let url = flow()
            .authorization_url("https://app/cb", "st4te", &scopes, Some("chal"))
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "response_type",
                "client_id",
                "redirect_uri",
                "state",
                "scope",
                "code_challenge",
                "code_challenge_method"
            ]
        );
        assert_eq!(pairs[4].1, "data.records:read schema.bases:read");
        assert_eq!(pairs[6].1, "S256");
    }

    #[test]
    fn test_authorization_url_without_pkce() {
        let url = flow().authorization_url("https://app/cb", "s", &[], None).unwrap();
        assert!(!url.as_str().contains("code_challenge"));
    }

    #[test]
    fn test_pkce_challenge_known_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );

        let pair = generate_pkce_pair();
        assert_eq!(pair.verifier.len(), 43);
        assert_eq!(pair.challenge, pkce_challenge(&pair.verifier));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let err = flow()
            .refresh(&Context::background(), &OAuthToken::new("a"))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CredentialError);
        assert_eq!(err.http_status, 500);
    }
}
