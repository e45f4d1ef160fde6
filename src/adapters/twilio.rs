//! Twilio Programmable Messaging adapter
//!
//! HTTP basic authentication with the account SID as username and the auth
//! token as password. The account SID also scopes every resource path and is
//! injected from the credential.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::adapters::base::{
    AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec, basic_auth_header,
};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, BasicAuthAdapter, Credential};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{FieldSpec, OperationParams, ParamError, ParamSchema, Rule};
use crate::transport::{CONTENT_TYPE_FORM, CallSpec};

pub const PROVIDER_ID: &str = "twilio";

const DEFAULT_BASE_URL: &str = "https://api.twilio.com/2010-04-01";
const ACCOUNT_SID: &str = "AccountSid";
const E164_PATTERN: &str = r"^\+[1-9]\d{1,14}$";

#[derive(Debug, Deserialize)]
pub struct SendMessageParams {
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "MessagingServiceSid")]
    pub messaging_service_sid: Option<String>,
    #[serde(rename = "Body")]
    pub body: String,
}

impl OperationParams for SendMessageParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(
                FieldSpec::string("To")
                    .required()
                    .rule(Rule::Pattern(E164_PATTERN.into()))
                    .describe("Destination number in E.164 format"),
            )
            .field(FieldSpec::string("From").rule(Rule::Pattern(E164_PATTERN.into())))
            .field(
                FieldSpec::string("MessagingServiceSid").rule(Rule::StartsWith("MG".into())),
            )
            .field(FieldSpec::string("Body").required().rule(Rule::Max(1600.0)))
    }

    fn validate(&self) -> Result<(), ParamError> {
        if self.from.is_none() && self.messaging_service_sid.is_none() {
            return Err(ParamError::new(
                "From",
                "required_without",
                "either From or MessagingServiceSid is required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    #[serde(rename = "To")]
    pub to: Option<String>,
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "DateSent")]
    pub date_sent: Option<String>,
    #[serde(rename = "PageSize")]
    pub page_size: Option<i64>,
}

impl OperationParams for ListMessagesParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("To"))
            .field(FieldSpec::string("From"))
            .field(
                FieldSpec::string("DateSent")
                    .rule(Rule::Pattern(r"^\d{4}-\d{2}-\d{2}$".into()))
                    .describe("YYYY-MM-DD"),
            )
            .field(FieldSpec::integer("PageSize").range(1.0, 1000.0))
    }
}

pub fn send_message(_ctx: &Context, params: SendMessageParams) -> Result<CallSpec, AdapterError> {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    form.append_pair("To", &params.to);
    if let Some(from) = &params.from {
        form.append_pair("From", from);
    }
    if let Some(sid) = &params.messaging_service_sid {
        form.append_pair("MessagingServiceSid", sid);
    }
    form.append_pair("Body", &params.body);
    Ok(CallSpec::post("/Accounts/{AccountSid}/Messages.json").form_body(form.finish()))
}

pub fn list_messages(
    _ctx: &Context,
    params: ListMessagesParams,
) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/Accounts/{AccountSid}/Messages.json")
        .query_opt("To", params.to)
        .query_opt("From", params.from)
        .query_opt("DateSent", params.date_sent)
        .query_opt("PageSize", params.page_size))
}

#[derive(Debug)]
pub struct TwilioAdapter {
    base: BaseAdapter,
}

impl TwilioAdapter {
    pub fn new(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
    ) -> Result<Self, AdapterError> {
        let settings = AdapterSettings::resolve(config, defaults, DEFAULT_BASE_URL)?;
        let rest = settings.rest_config().with_content_type(CONTENT_TYPE_FORM);
        let mut base = BaseAdapter::new(config, &settings, rest, Vec::new())?;

        base.register_operation(
            OperationSpec::new("send_message", "Send message")
                .description("Send an SMS or MMS message")
                .category("messaging"),
            send_message,
        );
        base.register_operation(
            OperationSpec::new("list_messages", "List messages").category("messaging"),
            list_messages,
        );

        Ok(Self { base })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for TwilioAdapter {
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
            .execute_basic(ctx, operation_id, params, credential, |spec, username| {
                spec.path_params
                    .insert(ACCOUNT_SID.to_string(), username.to_string());
            })
            .await
    }
}

#[async_trait]
impl BasicAuthAdapter for TwilioAdapter {
    async fn validate_basic_auth(
        &self,
        ctx: &Context,
        username: &str,
        password: &str,
    ) -> Result<(), AdapterError> {
        if username.is_empty() || password.is_empty() {
            return Err(AdapterError::credential("username and password are required")
                .scoped(PROVIDER_ID, "validate_basic_auth"));
        }
        let mut spec =
            CallSpec::get("/Accounts/{AccountSid}.json").path_param(ACCOUNT_SID, username);
        spec.set_header("Authorization", basic_auth_header(username, password));

        let subject = Credential::basic(username, password).subject();
        match self
            .base
            .dispatch(ctx, "validate_basic_auth", &subject, spec)
            .await
        {
            Ok(_) => {
                debug!(provider = PROVIDER_ID, "Basic credentials accepted");
                Ok(())
            }
            Err(error) => {
                warn!(provider = PROVIDER_ID, code = %error.code, "Basic credentials rejected");
                Err(error)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TwilioTemplate {
    defaults: AdapterDefaults,
}

impl TwilioTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for TwilioTemplate {
    fn identifier(&self) -> &str {
        PROVIDER_ID
    }

    fn auth_type(&self) -> AuthType {
        AuthType::Basic
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
        let adapter = TwilioAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::Basic(Arc::new(adapter)))
    }
}
