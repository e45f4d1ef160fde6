//! Amap (AutoNavi) web service adapter
//!
//! Authenticates with an API key passed as the `key` query parameter. Amap
//! answers HTTP 200 for most failures and signals them with `"status": "0"`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::adapters::base::{AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, ApiKeyAdapter, Credential};
use crate::context::Context;
use crate::error::{AdapterError, ErrorCode};
use crate::params::{FieldSpec, OperationParams, ParamSchema, Rule};
use crate::transport::CallSpec;

pub const PROVIDER_ID: &str = "amap";

const DEFAULT_BASE_URL: &str = "https://restapi.amap.com";
const LOCATION_PATTERN: &str = r"^-?\d{1,3}(\.\d+)?,-?\d{1,2}(\.\d+)?$";

#[derive(Debug, Deserialize)]
pub struct GeocodingParams {
    pub address: String,
    pub city: Option<String>,
}

impl OperationParams for GeocodingParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                FieldSpec::string("address")
                    .required()
                    .describe("Structured address, e.g. province, city, street"),
            )
            .field(FieldSpec::string("city").describe("City name, pinyin or adcode"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ReverseGeocodingParams {
    pub location: String,
    pub radius: Option<i64>,
    pub extensions: Option<String>,
}

impl OperationParams for ReverseGeocodingParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                FieldSpec::string("location")
                    .required()
                    .rule(Rule::Pattern(LOCATION_PATTERN.to_string()))
                    .describe("longitude,latitude"),
            )
            .field(FieldSpec::integer("radius").range(0.0, 3000.0))
            .field(FieldSpec::string("extensions").one_of(["base", "all"]))
    }
}

#[derive(Debug, Deserialize)]
pub struct WeatherParams {
    pub city: String,
    pub extensions: Option<String>,
}

impl OperationParams for WeatherParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("city").required().describe("City adcode"))
            .field(
                FieldSpec::string("extensions")
                    .one_of(["base", "all"])
                    .describe("base: live weather, all: forecast"),
            )
    }
}

pub fn geocoding(_ctx: &Context, params: GeocodingParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/v3/geocode/geo")
        .query("address", params.address)
        .query_opt("city", params.city))
}

pub fn reverse_geocoding(
    _ctx: &Context,
    params: ReverseGeocodingParams,
) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/v3/geocode/regeo")
        .query("location", params.location)
        .query_opt("radius", params.radius)
        .query_opt("extensions", params.extensions))
}

pub fn weather(_ctx: &Context, params: WeatherParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/v3/weather/weatherInfo")
        .query("city", params.city)
        .query_opt("extensions", params.extensions))
}

/// Map an in-band `"status": "0"` answer onto an adapter error.
pub fn check_status(body: Value) -> Result<Value, AdapterError> {
    if body.get("status").and_then(Value::as_str) != Some("0") {
        return Ok(body);
    }
    let info = body
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let code = if info.contains("KEY") || info.contains("SIGNATURE") {
        ErrorCode::CredentialError
    } else if info.contains("PARAMS") || info.contains("PARAMETER") {
        ErrorCode::InvalidParameters
    } else {
        ErrorCode::ProviderApiError
    };
    Err(AdapterError::new(code, format!("amap request failed: {}", info)).with_raw(body))
}

#[derive(Debug)]
pub struct AmapAdapter {
    base: BaseAdapter,
}

impl AmapAdapter {
    pub fn new(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
    ) -> Result<Self, AdapterError> {
        let settings = AdapterSettings::resolve(config, defaults, DEFAULT_BASE_URL)?;
        let mut base = BaseAdapter::new(config, &settings, settings.rest_config(), Vec::new())?;

        base.register_operation(
            OperationSpec::new("geocoding", "Geocoding")
                .description("Convert a structured address into coordinates")
                .category("geo"),
            geocoding,
        );
        base.register_operation(
            OperationSpec::new("reverse_geocoding", "Reverse geocoding")
                .description("Convert coordinates into an address")
                .category("geo"),
            reverse_geocoding,
        );
        base.register_operation(
            OperationSpec::new("weather", "Weather").category("weather"),
            weather,
        );

        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for AmapAdapter {
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
        let body = self
            .base
            .execute_api_key(ctx, operation_id, params, credential, |spec, key| {
                spec.query_params.insert("key".into(), key.into());
            })
            .await?;
        check_status(body).map_err(|e| e.scoped(PROVIDER_ID, operation_id))
    }
}

impl ApiKeyAdapter for AmapAdapter {}

#[derive(Debug, Clone, Default)]
pub struct AmapTemplate {
    defaults: AdapterDefaults,
}

impl AmapTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for AmapTemplate {
    fn identifier(&self) -> &str {
        PROVIDER_ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::ApiKey
    }

    fn validate_config(&self, config: &ProviderAdapterConfig) -> Result<(), TemplateError> {
        validate_common(self, config)?;
        AdapterSettings::resolve(config, &self.defaults, DEFAULT_BASE_URL)
            .map_err(|e| TemplateError::invalid(PROVIDER_ID, e.message))?;
        Ok(())
    }

    fn create_adapter(
        &self,
        config: &ProviderAdapterConfig,
    ) -> Result<AdapterHandle, TemplateError> {
        let adapter = AmapAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::ApiKey(Arc::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> AmapAdapter {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            PROVIDER_ID,
            "Amap",
            AuthType::ApiKey,
        ));
        AmapAdapter::new(&config, &AdapterDefaults::default()).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_reverse_geocoding_location_pattern() {
        let adapter = adapter();
        let ctx = Context::background();

        let spec = adapter
            .base()
            .prepare(
                &ctx,
                "reverse_geocoding",
                &params(json!({"location": "116.481488,39.990464", "radius": 500})),
            )
            .unwrap();
        assert_eq!(spec.path, "/v3/geocode/regeo");

        let err = adapter
            .base()
            .prepare(&ctx, "reverse_geocoding", &params(json!({"location": "beijing"})))
            .unwrap_err();
        assert_eq!(err.raw.unwrap()["constraint"], "regex");

        let err = adapter
            .base()
            .prepare(
                &ctx,
                "reverse_geocoding",
                &params(json!({"location": "116.4,39.9", "radius": 5000})),
            )
            .unwrap_err();
        assert_eq!(err.raw.unwrap()["field"], "radius");
    }

    #[test]
    fn test_check_status() {
        let ok = json!({"status": "1", "geocodes": []});
        assert_eq!(check_status(ok.clone()).unwrap(), ok);

        let err = check_status(json!({"status": "0", "info": "INVALID_USER_KEY", "infocode": "10001"}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialError);
        assert!(err.message.contains("INVALID_USER_KEY"));

        let err = check_status(json!({"status": "0", "info": "DAILY_QUERY_OVER_LIMIT"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderApiError);
    }

    #[tokio::test]
    async fn test_requires_api_key() {
        let err = adapter()
            .execute(
                &Context::background(),
                "geocoding",
                &params(json!({"address": "x"})),
                &Credential::None,
            )
            .await
            .unwrap_err();
        assert_eq!((err.code, err.http_status), (ErrorCode::CredentialError, 401));
        assert_eq!(err.operation_id, "geocoding");
    }
}
