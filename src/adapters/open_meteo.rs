//! Open-Meteo forecast adapter (public, no authentication)

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::adapters::base::{AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, Credential, PublicAdapter};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{FieldSpec, OperationParams, ParamSchema, Rule};
use crate::transport::CallSpec;

pub const PROVIDER_ID: &str = "open_meteo";

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

#[derive(Debug, Deserialize)]
pub struct ForecastParams {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub hourly: Vec<String>,
    #[serde(default)]
    pub daily: Vec<String>,
    pub current_weather: Option<bool>,
    pub timezone: Option<String>,
    pub forecast_days: Option<i64>,
}

impl OperationParams for ForecastParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::number("latitude").required().range(-90.0, 90.0))
            .field(FieldSpec::number("longitude").required().range(-180.0, 180.0))
            .field(
                FieldSpec::array("hourly")
                    .rule(Rule::Dive(vec![Rule::NonEmpty]))
                    .describe("Hourly variables, e.g. temperature_2m"),
            )
            .field(FieldSpec::array("daily").rule(Rule::Dive(vec![Rule::NonEmpty])))
            .field(FieldSpec::boolean("current_weather"))
            .field(FieldSpec::string("timezone").describe("IANA name or 'auto'"))
            .field(FieldSpec::integer("forecast_days").range(1.0, 16.0))
    }
}

pub fn forecast(_ctx: &Context, params: ForecastParams) -> Result<CallSpec, AdapterError> {
    let hourly = (!params.hourly.is_empty()).then(|| params.hourly.join(","));
    let daily = (!params.daily.is_empty()).then(|| params.daily.join(","));
    Ok(CallSpec::get("/v1/forecast")
        .query("latitude", params.latitude.to_string())
        .query("longitude", params.longitude.to_string())
        .query_opt("hourly", hourly)
        .query_opt("daily", daily)
        .query_opt("current_weather", params.current_weather)
        .query_opt("timezone", params.timezone)
        .query_opt("forecast_days", params.forecast_days))
}

#[derive(Debug)]
pub struct OpenMeteoAdapter {
    base: BaseAdapter,
}

impl OpenMeteoAdapter {
    pub fn new(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
    ) -> Result<Self, AdapterError> {
        let settings = AdapterSettings::resolve(config, defaults, DEFAULT_BASE_URL)?;
        let mut base = BaseAdapter::new(config, &settings, settings.rest_config(), Vec::new())?;
        base.register_operation(
            OperationSpec::new("forecast", "Weather forecast")
                .description("Hourly and daily forecast for a coordinate")
                .category("weather"),
            forecast,
        );
        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for OpenMeteoAdapter {
    fn info(&self) -> &ProviderAdapterInfo {
        self.base.info()
    }

    async fn execute(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        _credential: &Credential,
    ) -> Result<Value, AdapterError> {
        self.base.execute_public(ctx, operation_id, params).await
    }
}

impl PublicAdapter for OpenMeteoAdapter {}

#[derive(Debug, Clone, Default)]
pub struct OpenMeteoTemplate {
    defaults: AdapterDefaults,
}

impl OpenMeteoTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for OpenMeteoTemplate {
    fn identifier(&self) -> &str {
        PROVIDER_ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::None
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
        let adapter = OpenMeteoAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::Public(Arc::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> OpenMeteoAdapter {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            PROVIDER_ID,
            "Open-Meteo",
            AuthType::None,
        ));
        OpenMeteoAdapter::new(&config, &AdapterDefaults::default()).unwrap()
    }

    #[test]
    fn test_forecast_query() {
        let params = json!({
            "latitude": "52.52",
            "longitude": 13.41,
            "hourly": ["temperature_2m", "precipitation"],
            "current_weather": false
        });
        let spec = adapter()
            .base()
            .prepare(&Context::background(), "forecast", params.as_object().unwrap())
            .unwrap();
        let url = spec.resolve_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            url.query(),
            Some("current_weather=false&hourly=temperature_2m%2Cprecipitation&latitude=52.52&longitude=13.41")
        );
    }

    #[test]
    fn test_coordinate_bounds() {
        let params = json!({"latitude": 91, "longitude": 0});
        let err = adapter()
            .base()
            .prepare(&Context::background(), "forecast", params.as_object().unwrap())
            .unwrap_err();
        assert_eq!(err.raw.unwrap()["field"], "latitude");
    }
}
