//! Stripe adapter
//!
//! The secret key is sent as the username of a basic `Authorization` header
//! with an empty password. Write requests use form-urlencoded bodies with
//! bracketed keys for nested objects (`metadata[plan]=pro`).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::adapters::base::{
    AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec, basic_auth_header,
};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, ApiKeyAdapter, Credential};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{FieldSpec, NoParams, OperationParams, ParamError, ParamSchema, Rule};
use crate::transport::{CONTENT_TYPE_FORM, CallSpec};

pub const PROVIDER_ID: &str = "stripe";

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

#[derive(Debug, Deserialize)]
pub struct ListCustomersParams {
    pub limit: Option<i64>,
    pub starting_after: Option<String>,
    pub ending_before: Option<String>,
    pub email: Option<String>,
}

impl OperationParams for ListCustomersParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::integer("limit").range(1.0, 100.0))
            .field(FieldSpec::string("starting_after").describe("Cursor: customer id"))
            .field(FieldSpec::string("ending_before").describe("Cursor: customer id"))
            .field(FieldSpec::string("email"))
    }
}

#[derive(Debug, Deserialize)]
pub struct GetCustomerParams {
    #[serde(rename = "customerId")]
    pub customer_id: String,
}

impl OperationParams for GetCustomerParams {
    fn schema() -> ParamSchema {
        ParamSchema::new().field(
            FieldSpec::string("customerId")
                .required()
                .rule(Rule::StartsWith("cus_".into())),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomerParams {
    pub email: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl OperationParams for CreateCustomerParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("email").rule(Rule::Pattern(r"^[^@\s]+@[^@\s]+$".into())))
            .field(FieldSpec::string("name").rule(Rule::Max(256.0)))
            .field(FieldSpec::string("description"))
            .field(FieldSpec::string("phone"))
            .field(
                FieldSpec::object("metadata")
                    .rule(Rule::Max(50.0))
                    .describe("Up to 50 string key/value pairs"),
            )
    }

    fn validate(&self) -> Result<(), ParamError> {
        for (key, value) in &self.metadata {
            if value.is_array() || value.is_object() || value.is_null() {
                return Err(ParamError::new(
                    &format!("metadata.{}", key),
                    "scalar",
                    "must be a string, number or boolean",
                ));
            }
        }
        Ok(())
    }
}

pub fn list_customers(
    _ctx: &Context,
    params: ListCustomersParams,
) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/customers")
        .query_opt("limit", params.limit)
        .query_opt("starting_after", params.starting_after)
        .query_opt("ending_before", params.ending_before)
        .query_opt("email", params.email))
}

pub fn get_customer(_ctx: &Context, params: GetCustomerParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/customers/{customerId}").path_param("customerId", params.customer_id))
}

pub fn create_customer(
    _ctx: &Context,
    params: CreateCustomerParams,
) -> Result<CallSpec, AdapterError> {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in [
        ("email", &params.email),
        ("name", &params.name),
        ("description", &params.description),
        ("phone", &params.phone),
    ] {
        if let Some(value) = value {
            form.append_pair(key, value);
        }
    }
    for (key, value) in &params.metadata {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            _ => {
                return Err(AdapterError::internal(format!(
                    "metadata value for '{}' must be a scalar",
                    key
                )));
            }
        };
        form.append_pair(&format!("metadata[{}]", key), &text);
    }
    Ok(CallSpec::post("/customers").form_body(form.finish()))
}

pub fn get_balance(_ctx: &Context, _params: NoParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/balance"))
}

#[derive(Debug)]
pub struct StripeAdapter {
    base: BaseAdapter,
}

impl StripeAdapter {
    pub fn new(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
    ) -> Result<Self, AdapterError> {
        let settings = AdapterSettings::resolve(config, defaults, DEFAULT_BASE_URL)?;
        let rest = settings.rest_config().with_content_type(CONTENT_TYPE_FORM);
        let mut base = BaseAdapter::new(config, &settings, rest, Vec::new())?;

        base.register_operation(
            OperationSpec::new("list_customers", "List customers").category("customers"),
            list_customers,
        );
        base.register_operation(
            OperationSpec::new("get_customer", "Get customer").category("customers"),
            get_customer,
        );
        base.register_operation(
            OperationSpec::new("create_customer", "Create customer")
                .description("Create a customer with optional metadata")
                .category("customers"),
            create_customer,
        );
        base.register_operation(
            OperationSpec::new("get_balance", "Get balance").category("balance"),
            get_balance,
        );

        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for StripeAdapter {
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
            .execute_api_key(ctx, operation_id, params, credential, |spec, key| {
                spec.set_header("Authorization", basic_auth_header(key, ""));
            })
            .await
    }
}

impl ApiKeyAdapter for StripeAdapter {}

#[derive(Debug, Clone, Default)]
pub struct StripeTemplate {
    defaults: AdapterDefaults,
}

impl StripeTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for StripeTemplate {
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
        let adapter = StripeAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::ApiKey(Arc::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn adapter() -> StripeAdapter {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            PROVIDER_ID,
            "Stripe",
            AuthType::ApiKey,
        ));
        StripeAdapter::new(&config, &AdapterDefaults::default()).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_create_customer_form_body() {
        let spec = adapter()
            .base()
            .prepare(
                &Context::background(),
                "create_customer",
                &params(json!({
                    "email": "jenny@example.com",
                    "name": "Jenny Rosen",
                    "metadata": {"plan": "pro", "seats": 3}
                })),
            )
            .unwrap();
        assert_eq!(spec.header_value("content-type"), Some(CONTENT_TYPE_FORM));
        assert_eq!(
            spec.body,
            Some(Value::String(
                "email=jenny%40example.com&name=Jenny+Rosen&metadata%5Bplan%5D=pro&metadata%5Bseats%5D=3"
                    .into()
            ))
        );
    }

    #[test]
    fn test_metadata_rejects_nested_values() {
        let err = adapter()
            .base()
            .prepare(
                &Context::background(),
                "create_customer",
                &params(json!({"metadata": {"nested": {"a": 1}}})),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameters);
        assert_eq!(err.http_status, 400);
        assert!(err.message.contains("metadata.nested"));
    }

    #[test]
    fn test_customer_id_prefix() {
        let err = adapter()
            .base()
            .prepare(
                &Context::background(),
                "get_customer",
                &params(json!({"customerId": "usr_1"})),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameters);
    }
}
