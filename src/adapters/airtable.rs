//! Airtable adapter
//!
//! OAuth 2.0 with mandatory PKCE. The authorization code is exchanged with the
//! client credentials in a basic `Authorization` header.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use url::Url;

use crate::adapters::base::{AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::oauth::{ClientAuthStyle, OAuthEndpoints, OAuthFlow};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, Credential, OAuthAdapter, OAuthToken};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{FieldSpec, NoParams, OperationParams, ParamError, ParamSchema, Rule};
use crate::permissions::Permission;
use crate::transport::{CallSpec, QueryValue};

pub const PROVIDER_ID: &str = "airtable";

const DEFAULT_BASE_URL: &str = "https://api.airtable.com/v0";
const AUTHORIZE_URL: &str = "https://airtable.com/oauth2/v1/authorize";
const TOKEN_URL: &str = "https://airtable.com/oauth2/v1/token";

const MAX_RECORDS_PER_WRITE: f64 = 10.0;

pub fn default_permissions() -> Vec<Permission> {
    vec![
        Permission::new("read_records", "Read records", ["data.records:read"])
            .with_description("See the data in records"),
        Permission::new("write_records", "Write records", ["data.records:write"])
            .with_description("Create, edit and delete records"),
        Permission::new("read_schema", "Read schema", ["schema.bases:read"])
            .with_description("See the structure of a base"),
        Permission::new("read_user", "Read user email", ["user.email:read"]),
    ]
}

#[derive(Debug, Deserialize)]
pub struct ListBasesParams {
    pub offset: Option<String>,
}

impl OperationParams for ListBasesParams {
    fn schema() -> ParamSchema {
        ParamSchema::new().field(FieldSpec::string("offset").describe("Pagination cursor"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    #[serde(rename = "baseId")]
    pub base_id: String,
    #[serde(rename = "tableIdOrName")]
    pub table_id_or_name: String,
    #[serde(rename = "pageSize")]
    pub page_size: Option<i64>,
    #[serde(rename = "maxRecords")]
    pub max_records: Option<i64>,
    pub view: Option<String>,
    #[serde(rename = "filterByFormula")]
    pub filter_by_formula: Option<String>,
    pub offset: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

impl OperationParams for ListRecordsParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(base_id_field())
            .field(table_field())
            .field(
                FieldSpec::integer("pageSize")
                    .range(1.0, 100.0)
                    .describe("Records per page"),
            )
            .field(FieldSpec::integer("maxRecords").rule(Rule::Min(1.0)))
            .field(FieldSpec::string("view"))
            .field(FieldSpec::string("filterByFormula"))
            .field(FieldSpec::string("offset"))
            .field(
                FieldSpec::array("fields")
                    .rule(Rule::Dive(vec![Rule::NonEmpty]))
                    .describe("Field names to return"),
            )
            .field(FieldSpec::array("sort").describe("List of {field, direction}"))
    }

    fn validate(&self) -> Result<(), ParamError> {
        for (index, sort) in self.sort.iter().enumerate() {
            if sort.field.is_empty() {
                return Err(ParamError::new(
                    &format!("sort[{}].field", index),
                    "required",
                    "must not be empty",
                ));
            }
            if let Some(direction) = &sort.direction {
                if direction != "asc" && direction != "desc" {
                    return Err(ParamError::new(
                        &format!("sort[{}].direction", index),
                        "oneof",
                        "must be one of [asc, desc]",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct GetRecordParams {
    #[serde(rename = "baseId")]
    pub base_id: String,
    #[serde(rename = "tableIdOrName")]
    pub table_id_or_name: String,
    #[serde(rename = "recordId")]
    pub record_id: String,
}

impl OperationParams for GetRecordParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(base_id_field())
            .field(table_field())
            .field(
                FieldSpec::string("recordId")
                    .required()
                    .rule(Rule::StartsWith("rec".into())),
            )
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordsParams {
    #[serde(rename = "baseId")]
    pub base_id: String,
    #[serde(rename = "tableIdOrName")]
    pub table_id_or_name: String,
    pub records: Vec<Value>,
    pub typecast: Option<bool>,
}

impl OperationParams for CreateRecordsParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(base_id_field())
            .field(table_field())
            .field(
                FieldSpec::array("records")
                    .required()
                    .rule(Rule::Max(MAX_RECORDS_PER_WRITE))
                    .describe("Records as {fields: {...}} objects"),
            )
            .field(FieldSpec::boolean("typecast"))
    }

    fn validate(&self) -> Result<(), ParamError> {
        for (index, record) in self.records.iter().enumerate() {
            if !record.get("fields").is_some_and(Value::is_object) {
                return Err(ParamError::new(
                    &format!("records[{}].fields", index),
                    "required",
                    "must be an object",
                ));
            }
        }
        Ok(())
    }
}

fn base_id_field() -> FieldSpec {
    FieldSpec::string("baseId")
        .required()
        .rule(Rule::StartsWith("app".into()))
        .describe("Base identifier")
}

fn table_field() -> FieldSpec {
    FieldSpec::string("tableIdOrName")
        .required()
        .describe("Table identifier or name")
}

pub fn get_me(_ctx: &Context, _params: NoParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/meta/whoami"))
}

pub fn list_bases(_ctx: &Context, params: ListBasesParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/meta/bases").query_opt("offset", params.offset))
}

pub fn list_records(_ctx: &Context, params: ListRecordsParams) -> Result<CallSpec, AdapterError> {
    let mut spec = CallSpec::get("/{baseId}/{tableIdOrName}")
        .path_param("baseId", params.base_id)
        .path_param("tableIdOrName", params.table_id_or_name)
        .query_opt("pageSize", params.page_size)
        .query_opt("maxRecords", params.max_records)
        .query_opt("view", params.view)
        .query_opt("filterByFormula", params.filter_by_formula)
        .query_opt("offset", params.offset);

    if !params.fields.is_empty() {
        spec = spec.query("fields[]", QueryValue::Multi(params.fields));
    }
    for (index, sort) in params.sort.into_iter().enumerate() {
        spec = spec
            .query(format!("sort[{}][field]", index), sort.field)
            .query_opt(format!("sort[{}][direction]", index), sort.direction);
    }
    Ok(spec)
}

pub fn get_record(_ctx: &Context, params: GetRecordParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/{baseId}/{tableIdOrName}/{recordId}")
        .path_param("baseId", params.base_id)
        .path_param("tableIdOrName", params.table_id_or_name)
        .path_param("recordId", params.record_id))
}

pub fn create_records(
    _ctx: &Context,
    params: CreateRecordsParams,
) -> Result<CallSpec, AdapterError> {
    let mut body = json!({ "records": params.records });
    if let Some(typecast) = params.typecast {
        body["typecast"] = Value::Bool(typecast);
    }
    Ok(CallSpec::post("/{baseId}/{tableIdOrName}")
        .path_param("baseId", params.base_id)
        .path_param("tableIdOrName", params.table_id_or_name)
        .json_body(body))
}

#[derive(Debug)]
pub struct AirtableAdapter {
    base: BaseAdapter,
    oauth: OAuthFlow,
}

impl AirtableAdapter {
    pub fn new(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
    ) -> Result<Self, AdapterError> {
        let settings = AdapterSettings::resolve(config, defaults, DEFAULT_BASE_URL)?;
        let oauth_config = config
            .oauth
            .as_ref()
            .ok_or_else(|| AdapterError::missing_field("oauth").for_provider(PROVIDER_ID))?;
        let oauth = OAuthFlow::new(
            PROVIDER_ID,
            oauth_config,
            OAuthEndpoints {
                authorize_url: config.custom_str("authorize_url").unwrap_or(AUTHORIZE_URL).to_string(),
                token_url: config.custom_str("token_url").unwrap_or(TOKEN_URL).to_string(),
                auth_style: ClientAuthStyle::BasicHeader,
            },
        )?;

        let mut base = BaseAdapter::new(
            config,
            &settings,
            settings.rest_config(),
            default_permissions(),
        )?;
        base.register_operation(
            OperationSpec::new("get_me", "Get current user")
                .description("Identity of the authorized user")
                .category("user"),
            get_me,
        );
        base.register_operation(
            OperationSpec::new("list_bases", "List bases")
                .category("schema")
                .requires(&["read_schema"]),
            list_bases,
        );
        base.register_operation(
            OperationSpec::new("list_records", "List records")
                .description("List records of a table with optional filtering and sorting")
                .category("records")
                .requires(&["read_records"]),
            list_records,
        );
        base.register_operation(
            OperationSpec::new("get_record", "Get record")
                .category("records")
                .requires(&["read_records"]),
            get_record,
        );
        base.register_operation(
            OperationSpec::new("create_records", "Create records")
                .description("Create up to 10 records in one request")
                .category("records")
                .requires(&["write_records"]),
            create_records,
        );

        Ok(Self { base, oauth })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for AirtableAdapter {
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

#[async_trait]
impl OAuthAdapter for AirtableAdapter {
    fn should_refresh_token(&self, token: &OAuthToken) -> bool {
        OAuthFlow::should_refresh_token(token)
    }

    async fn refresh_oauth_token(
        &self,
        ctx: &Context,
        token: &OAuthToken,
    ) -> Result<OAuthToken, AdapterError> {
        self.oauth.refresh(ctx, token).await
    }

    fn generate_oauth_url(
        &self,
        redirect_uri: &str,
        state: &str,
        scopes: &[String],
        code_challenge: Option<&str>,
    ) -> Result<Url, AdapterError> {
        if code_challenge.is_none_or(str::is_empty) {
            return Err(AdapterError::invalid_parameters(
                "airtable requires a PKCE code_challenge",
            )
            .for_provider(PROVIDER_ID));
        }
        self.oauth
            .authorization_url(redirect_uri, state, scopes, code_challenge)
    }

    async fn exchange_code_for_tokens(
        &self,
        ctx: &Context,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthToken, AdapterError> {
        self.oauth
            .exchange_code(ctx, code, redirect_uri, code_verifier)
            .await
    }

    fn check_missing_permissions(
        &self,
        operation_id: &str,
        authorized_scopes: &[String],
    ) -> Result<(bool, BTreeSet<String>), AdapterError> {
        self.base
            .missing_permissions(operation_id, authorized_scopes)
            .map_err(|e| e.scoped(PROVIDER_ID, operation_id))
    }

    fn get_scopes_from_permissions(&self, permission_ids: &[String]) -> BTreeSet<String> {
        self.base.permissions().required_scopes_by_ids(permission_ids)
    }

    fn get_permission_ids_from_scopes(&self, scopes: &[String]) -> BTreeSet<String> {
        self.base.permissions().permission_ids_from_scopes(scopes)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AirtableTemplate {
    defaults: AdapterDefaults,
}

impl AirtableTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for AirtableTemplate {
    fn identifier(&self) -> &str {
        PROVIDER_ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::OAuth
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
        let adapter = AirtableAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::OAuth(Arc::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::metadata::OAuthConfig;
    use crate::error::ErrorCode;
    use crate::transport::HttpMethod;

    fn config() -> ProviderAdapterConfig {
        ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            PROVIDER_ID,
            "Airtable",
            AuthType::OAuth,
        ))
        .with_oauth(OAuthConfig::new("cid", "secret"))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_list_records_query_encoding() {
        let adapter = AirtableAdapter::new(&config(), &AdapterDefaults::default()).unwrap();
        let spec = adapter
            .base()
            .prepare(
                &Context::background(),
                "list_records",
                &params(json!({
                    "baseId": "appXYZ",
                    "tableIdOrName": "Tasks list",
                    "pageSize": 50,
                    "fields": ["Name", "Status"],
                    "sort": [{"field": "Name", "direction": "desc"}]
                })),
            )
            .unwrap();

        let url = spec.resolve_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(url.path(), "/v0/appXYZ/Tasks%20list");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("pageSize".into(), "50".into())));
        assert!(pairs.contains(&("fields[]".into(), "Name".into())));
        assert!(pairs.contains(&("fields[]".into(), "Status".into())));
        assert!(pairs.contains(&("sort[0][field]".into(), "Name".into())));
        assert!(pairs.contains(&("sort[0][direction]".into(), "desc".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "maxRecords"));
    }

    #[test]
    fn test_sort_direction_is_validated() {
        let adapter = AirtableAdapter::new(&config(), &AdapterDefaults::default()).unwrap();
        let err = adapter
            .base()
            .prepare(
                &Context::background(),
                "list_records",
                &params(json!({
                    "baseId": "appXYZ",
                    "tableIdOrName": "t",
                    "sort": [{"field": "Name", "direction": "up"}]
                })),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameters);
        assert_eq!(err.raw.unwrap()["field"], "sort[0].direction");
    }

    #[test]
    fn test_create_records_limits() {
        let adapter = AirtableAdapter::new(&config(), &AdapterDefaults::default()).unwrap();
        let ctx = Context::background();
        let records: Vec<Value> = (0..11).map(|i| json!({"fields": {"n": i}})).collect();
        let err = adapter
            .base()
            .prepare(
                &ctx,
                "create_records",
                &params(json!({"baseId": "app1", "tableIdOrName": "t", "records": records})),
            )
            .unwrap_err();
        assert_eq!(err.raw.unwrap()["constraint"], "max");

        let spec = adapter
            .base()
            .prepare(
                &ctx,
                "create_records",
                &params(json!({
                    "baseId": "app1",
                    "tableIdOrName": "t",
                    "records": [{"fields": {"Name": "a"}}],
                    "typecast": true
                })),
            )
            .unwrap();
        assert_eq!(spec.method, HttpMethod::Post);
        assert_eq!(spec.body.unwrap()["typecast"], true);
    }

    #[test]
    fn test_oauth_url_requires_pkce() {
        let adapter = AirtableAdapter::new(&config(), &AdapterDefaults::default()).unwrap();
        let scopes = adapter.get_scopes_from_permissions(&["read_records".to_string()]);
        let scopes: Vec<String> = scopes.into_iter().collect();
        assert_eq!(scopes, vec!["data.records:read"]);

        assert!(adapter.generate_oauth_url("https://app/cb", "s", &scopes, None).is_err());
        let url = adapter
            .generate_oauth_url("https://app/cb", "s", &scopes, Some("challenge"))
            .unwrap();
        assert!(url.as_str().starts_with(AUTHORIZE_URL));
        assert!(url.as_str().contains("code_challenge_method=S256"));
    }

    #[test]
    fn test_template_requires_oauth_config() {
        let template = AirtableTemplate::default();
        let mut config = config();
        assert!(template.validate_config(&config).is_ok());
        config.oauth = None;
        assert!(template.validate_config(&config).is_err());
    }

    #[test]
    fn test_permission_lookup_from_scopes() {
        let adapter = AirtableAdapter::new(&config(), &AdapterDefaults::default()).unwrap();
        let ids = adapter.get_permission_ids_from_scopes(&[
            "data.records:read".to_string(),
            "schema.bases:read".to_string(),
        ]);
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["read_records", "read_schema"]
        );
        let (all, missing) = adapter
            .check_missing_permissions("create_records", &["data.records:read".to_string()])
            .unwrap();
        assert!(!all);
        assert!(missing.contains("write_records"));
    }
}
