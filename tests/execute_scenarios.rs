use adapters::adapters::airtable::AirtableAdapter;
use adapters::adapters::amap::AmapAdapter;
use adapters::adapters::open_meteo::OpenMeteoAdapter;
use adapters::adapters::stripe::StripeAdapter;
use adapters::adapters::twilio::TwilioAdapter;
use adapters::adapters::{
    Adapter, AdapterDefaults, AdapterSettings, AuthType, BaseAdapter, Credential, OAuthConfig,
    OperationSpec, ProviderAdapterConfig, ProviderAdapterInfo,
};
use adapters::context::Context;
use adapters::error::{AdapterError, ErrorCode};
use adapters::params::NoParams;
use adapters::permissions::Permission;
use adapters::transport::CallSpec;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string, header, method, path, query_param},
};

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn config(id: &str, auth_type: AuthType, base_url: &str) -> ProviderAdapterConfig {
    ProviderAdapterConfig::new(ProviderAdapterInfo::new(id, id, auth_type))
        .with_custom("base_url", json!(base_url))
}

/// Minimal OAuth adapter: `get_me` needs no permission, `get_profile` needs `read_me`.
struct FixtureAdapter {
    base: BaseAdapter,
}

impl FixtureAdapter {
    fn new(base_url: &str) -> Self {
        let config = config("fixture", AuthType::OAuth, base_url);
        let settings =
            AdapterSettings::resolve(&config, &AdapterDefaults::default(), base_url).unwrap();
        let mut base = BaseAdapter::new(
            &config,
            &settings,
            settings.rest_config(),
            vec![Permission::new("read_me", "Read profile", ["me:read"])],
        )
        .unwrap();
        base.register_operation(OperationSpec::new("get_me", "Get me"), |_ctx, _: NoParams| {
            Ok(CallSpec::get("/me"))
        });
        base.register_operation(
            OperationSpec::new("get_profile", "Get profile").requires(&["read_me"]),
            |_ctx, _: NoParams| Ok(CallSpec::get("/me/profile")),
        );
        Self { base }
    }
}

#[async_trait]
impl Adapter for FixtureAdapter {
    fn info(&self) -> &ProviderAdapterInfo {
        self.base.info()
    }

    async fn execute(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<Value, AdapterError> {
        self.base
            .execute_oauth(ctx, operation_id, params, credential)
            .await
    }
}

#[tokio::test]
async fn test_oauth_execute_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer tkA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = FixtureAdapter::new(&server.uri());
    let result = adapter
        .execute(
            &Context::background(),
            "get_me",
            &Map::new(),
            &Credential::oauth("tkA", &[]),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({"id": "u1"}));
}

#[tokio::test]
async fn test_oauth_scopes_unlock_guarded_operation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me/profile"))
        .and(header("authorization", "Bearer tkA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bio": ""})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = FixtureAdapter::new(&server.uri());
    let ctx = Context::background();
    let error = adapter
        .execute(&ctx, "get_profile", &Map::new(), &Credential::oauth("tkA", &[]))
        .await
        .unwrap_err();
    assert_eq!(error.http_status, 403);

    adapter
        .execute(
            &ctx,
            "get_profile",
            &Map::new(),
            &Credential::oauth("tkA", &["me:read"]),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_permission_is_rejected_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .expect(0)
        .mount(&server)
        .await;

    let mut info = ProviderAdapterInfo::new("airtable", "Airtable", AuthType::OAuth);
    info.permissions = vec![Permission::new(
        "read_records",
        "Read records",
        ["records:read"],
    )];
    let config = ProviderAdapterConfig::new(info)
        .with_oauth(OAuthConfig::new("cid", "secret"))
        .with_custom("base_url", json!(server.uri()));
    let adapter = AirtableAdapter::new(&config, &AdapterDefaults::default()).unwrap();

    let error = adapter
        .execute(
            &Context::background(),
            "list_records",
            &params(json!({"baseId": "appX", "tableIdOrName": "Tasks"})),
            &Credential::oauth("tk", &["schema:read"]),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::CredentialError);
    assert_eq!(error.http_status, 403);
    assert!(error.message.contains("read_records"));
    assert_eq!(error.provider_id, "airtable");
    assert_eq!(error.operation_id, "list_records");
}

#[tokio::test]
async fn test_invalid_params_never_reach_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config("airtable", AuthType::OAuth, &server.uri())
        .with_oauth(OAuthConfig::new("cid", "secret"));
    let adapter = AirtableAdapter::new(&config, &AdapterDefaults::default()).unwrap();

    let error = adapter
        .execute(
            &Context::background(),
            "get_record",
            &params(json!({"baseId": "appX", "recordId": "rec1"})),
            &Credential::oauth("tk", &["data.records:read"]),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidParameters);
    assert_eq!(error.http_status, 400);
    assert!(error.message.contains("tableIdOrName"));
}

#[tokio::test]
async fn test_api_key_is_appended_to_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/geocode/geo"))
        .and(query_param("address", "X"))
        .and(query_param("key", "K"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "geocodes": [{"location": "116.48,39.99"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AmapAdapter::new(
        &config("amap", AuthType::ApiKey, &server.uri()),
        &AdapterDefaults::default(),
    )
    .unwrap();
    let result = adapter
        .execute(
            &Context::background(),
            "geocoding",
            &params(json!({"address": "X"})),
            &Credential::api_key("K"),
        )
        .await
        .unwrap();
    assert_eq!(result["geocodes"][0]["location"], "116.48,39.99");
}

#[tokio::test]
async fn test_in_band_failure_status_is_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/weather/weatherInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "0",
            "info": "INVALID_USER_KEY"
        })))
        .mount(&server)
        .await;

    let adapter = AmapAdapter::new(
        &config("amap", AuthType::ApiKey, &server.uri()),
        &AdapterDefaults::default(),
    )
    .unwrap();
    let error = adapter
        .execute(
            &Context::background(),
            "weather",
            &params(json!({"city": "110101"})),
            &Credential::api_key("bad"),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::CredentialError);
    assert_eq!(error.operation_id, "weather");
}

#[tokio::test]
async fn test_breaker_opens_after_consecutive_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let config = config("open_meteo", AuthType::None, &server.uri())
        .with_custom("circuit_breaker", json!({"failure_threshold": 2}))
        .with_custom("retry", json!({"max_attempts": 1}));
    let adapter = OpenMeteoAdapter::new(&config, &AdapterDefaults::default()).unwrap();
    let ctx = Context::background();
    let forecast = params(json!({"latitude": 52.52, "longitude": 13.41}));

    for _ in 0..2 {
        let error = adapter
            .execute(&ctx, "forecast", &forecast, &Credential::None)
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::ProviderApiError);
        assert_eq!(error.http_status, 500);
    }

    let error = adapter
        .execute(&ctx, "forecast", &forecast, &Credential::None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::CircuitOpen);
    assert_eq!(error.provider_id, "open_meteo");
}

#[tokio::test]
async fn test_client_errors_do_not_trip_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"reason": "bad"})))
        .expect(3)
        .mount(&server)
        .await;

    let config = config("open_meteo", AuthType::None, &server.uri())
        .with_custom("circuit_breaker", json!({"failure_threshold": 1}));
    let adapter = OpenMeteoAdapter::new(&config, &AdapterDefaults::default()).unwrap();
    let forecast = params(json!({"latitude": 1.0, "longitude": 2.0}));

    for _ in 0..3 {
        let error = adapter
            .execute(&Context::background(), "forecast", &forecast, &Credential::None)
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidParameters);
        assert_eq!(error.raw, Some(json!({"reason": "bad"})));
    }
}

#[tokio::test]
async fn test_form_encoded_post_with_secret_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/customers"))
        .and(header("authorization", "Basic c2tfdGVzdDo="))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("email=a%40b.io&metadata%5Bplan%5D=pro"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_1"})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = StripeAdapter::new(
        &config("stripe", AuthType::ApiKey, &server.uri()),
        &AdapterDefaults::default(),
    )
    .unwrap();
    let result = adapter
        .execute(
            &Context::background(),
            "create_customer",
            &params(json!({"email": "a@b.io", "metadata": {"plan": "pro"}})),
            &Credential::api_key("sk_test"),
        )
        .await
        .unwrap();
    assert_eq!(result["id"], "cus_1");
}

#[tokio::test]
async fn test_basic_auth_username_fills_account_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Accounts/AC123/Messages.json"))
        .and(query_param("PageSize", "5"))
        .and(header("authorization", "Basic QUMxMjM6cHc="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": []})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = TwilioAdapter::new(
        &config("twilio", AuthType::Basic, &server.uri()),
        &AdapterDefaults::default(),
    )
    .unwrap();
    let result = adapter
        .execute(
            &Context::background(),
            "list_messages",
            &params(json!({"PageSize": 5})),
            &Credential::basic("AC123", "pw"),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({"messages": []}));
}

#[tokio::test]
async fn test_local_rate_limit_rejects_without_calling_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hourly": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config("open_meteo", AuthType::None, &server.uri())
        .with_custom("rate_limit", json!({"requests_per_second": 1}));
    let adapter = OpenMeteoAdapter::new(&config, &AdapterDefaults::default()).unwrap();
    let ctx = Context::background();
    let forecast = params(json!({"latitude": 52.52, "longitude": 13.41}));

    adapter
        .execute(&ctx, "forecast", &forecast, &Credential::None)
        .await
        .unwrap();
    let error = adapter
        .execute(&ctx, "forecast", &forecast, &Credential::None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ProviderApiError);
    assert_eq!(error.http_status, 429);
    assert_eq!(error.provider_id, "open_meteo");
    assert_eq!(error.operation_id, "forecast");
}

#[tokio::test]
async fn test_rate_limit_buckets_are_per_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "balance"})))
        .expect(2)
        .mount(&server)
        .await;

    let config = config("stripe", AuthType::ApiKey, &server.uri())
        .with_custom("rate_limit", json!({"requests_per_second": 1}));
    let adapter = StripeAdapter::new(&config, &AdapterDefaults::default()).unwrap();
    let ctx = Context::background();

    adapter
        .execute(&ctx, "get_balance", &Map::new(), &Credential::api_key("sk_a"))
        .await
        .unwrap();
    let error = adapter
        .execute(&ctx, "get_balance", &Map::new(), &Credential::api_key("sk_a"))
        .await
        .unwrap_err();
    assert_eq!(error.http_status, 429);

    adapter
        .execute(&ctx, "get_balance", &Map::new(), &Credential::api_key("sk_b"))
        .await
        .unwrap();
}
