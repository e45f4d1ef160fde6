use adapters::adapters::airtable::AirtableAdapter;
use adapters::adapters::github::GitHubAdapter;
use adapters::adapters::{
    AdapterDefaults, AuthType, OAuthAdapter, OAuthConfig, OAuthToken, ProviderAdapterConfig,
    ProviderAdapterInfo,
};
use adapters::context::Context;
use adapters::error::ErrorCode;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path},
};

fn oauth_config(id: &str, server: &MockServer) -> ProviderAdapterConfig {
    ProviderAdapterConfig::new(ProviderAdapterInfo::new(id, id, AuthType::OAuth))
        .with_oauth(OAuthConfig::new("cid", "secret"))
        .with_custom("authorize_url", json!(format!("{}/authorize", server.uri())))
        .with_custom("token_url", json!(format!("{}/token", server.uri())))
}

#[tokio::test]
async fn test_code_exchange_with_credentials_in_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=c0de"))
        .and(body_string_contains("client_id=cid"))
        .and(body_string_contains("client_secret=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_1",
            "token_type": "bearer",
            "scope": "repo",
            "refresh_token": "ghr_1",
            "expires_in": 28800
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter =
        GitHubAdapter::new(&oauth_config("github", &server), &AdapterDefaults::default()).unwrap();
    let token = adapter
        .exchange_code_for_tokens(&Context::background(), "c0de", "https://app/cb", None)
        .await
        .unwrap();

    assert_eq!(token.access_token, "gho_1");
    assert_eq!(token.refresh_token.as_deref(), Some("ghr_1"));
    assert!(token.expiry.is_some());
    assert!(!adapter.should_refresh_token(&token));
}

#[tokio::test]
async fn test_code_exchange_with_basic_header_and_verifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("authorization", "Basic Y2lkOnNlY3JldA=="))
        .and(body_string_contains("code_verifier=v3rifier"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at_1",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter =
        AirtableAdapter::new(&oauth_config("airtable", &server), &AdapterDefaults::default())
            .unwrap();
    let token = adapter
        .exchange_code_for_tokens(
            &Context::background(),
            "c0de",
            "https://app/cb",
            Some("v3rifier"),
        )
        .await
        .unwrap();
    assert_eq!(token.access_token, "at_1");
    assert!(token.refresh_token.is_none());
}

#[tokio::test]
async fn test_refresh_keeps_previous_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at_2",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter =
        AirtableAdapter::new(&oauth_config("airtable", &server), &AdapterDefaults::default())
            .unwrap();
    let mut token = OAuthToken::new("at_1");
    token.refresh_token = Some("r1".into());

    let refreshed = adapter
        .refresh_oauth_token(&Context::background(), &token)
        .await
        .unwrap();
    assert_eq!(refreshed.access_token, "at_2");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_rejected_refresh_is_a_credential_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .mount(&server)
        .await;

    let adapter =
        GitHubAdapter::new(&oauth_config("github", &server), &AdapterDefaults::default()).unwrap();
    let mut token = OAuthToken::new("at_1");
    token.refresh_token = Some("revoked".into());

    let error = adapter
        .refresh_oauth_token(&Context::background(), &token)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::CredentialError);
    assert_eq!(error.http_status, 500);
    assert_eq!(error.provider_id, "github");
}

#[tokio::test]
async fn test_authorization_urls() {
    let server = MockServer::start().await;
    let scopes = vec!["repo".to_string(), "read:user".to_string()];

    let github =
        GitHubAdapter::new(&oauth_config("github", &server), &AdapterDefaults::default()).unwrap();
    let url = github
        .generate_oauth_url("https://app/cb", "s1", &scopes, Some("ignored"))
        .unwrap();
    assert!(url.as_str().starts_with(&format!("{}/authorize?", server.uri())));
    assert!(url.as_str().contains("scope=repo+read%3Auser"));
    assert!(!url.as_str().contains("code_challenge"));

    let airtable =
        AirtableAdapter::new(&oauth_config("airtable", &server), &AdapterDefaults::default())
            .unwrap();
    let error = airtable
        .generate_oauth_url("https://app/cb", "s1", &scopes, None)
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidParameters);
    let url = airtable
        .generate_oauth_url("https://app/cb", "s1", &scopes, Some("chal"))
        .unwrap();
    assert!(url.as_str().ends_with("code_challenge=chal&code_challenge_method=S256"));
}
