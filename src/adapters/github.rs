//! GitHub adapter
//!
//! OAuth web application flow without PKCE; the client credentials travel in
//! the token request body.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::adapters::base::{AdapterDefaults, AdapterSettings, BaseAdapter, OperationSpec};
use crate::adapters::metadata::{AuthType, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::oauth::{ClientAuthStyle, OAuthEndpoints, OAuthFlow};
use crate::adapters::templates::{AdapterTemplate, TemplateError, validate_common};
use crate::adapters::trait_::{Adapter, AdapterHandle, Credential, OAuthAdapter, OAuthToken};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{FieldSpec, NoParams, OperationParams, ParamSchema, Rule};
use crate::permissions::Permission;
use crate::transport::CallSpec;

pub const PROVIDER_ID: &str = "github";

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_VERSION: &str = "2022-11-28";

pub fn default_permissions() -> Vec<Permission> {
    vec![
        Permission::new("read_user", "Read profile", ["read:user"]),
        Permission::new("read_repos", "Read repositories", ["repo"])
            .with_description("List and inspect repositories"),
        Permission::new("read_issues", "Read issues", ["repo"]),
        Permission::new("write_issues", "Write issues", ["repo"])
            .with_description("Open issues on behalf of the user"),
    ]
}

#[derive(Debug, Deserialize)]
pub struct ListReposParams {
    pub visibility: Option<String>,
    pub sort: Option<String>,
    pub per_page: Option<i64>,
    pub page: Option<i64>,
}

impl OperationParams for ListReposParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("visibility").one_of(["all", "public", "private"]))
            .field(FieldSpec::string("sort").one_of(["created", "updated", "pushed", "full_name"]))
            .field(FieldSpec::integer("per_page").range(1.0, 100.0))
            .field(FieldSpec::integer("page").rule(Rule::Min(1.0)))
    }
}

#[derive(Debug, Deserialize)]
pub struct RepoParams {
    pub owner: String,
    pub repo: String,
}

impl OperationParams for RepoParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("owner").required())
            .field(FieldSpec::string("repo").required())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListIssuesParams {
    pub owner: String,
    pub repo: String,
    pub state: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub per_page: Option<i64>,
}

impl OperationParams for ListIssuesParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("owner").required())
            .field(FieldSpec::string("repo").required())
            .field(
                FieldSpec::string("state")
                    .one_of(["open", "closed", "all"])
                    .default_value(Value::String("open".into())),
            )
            .field(FieldSpec::array("labels").describe("Only issues carrying all of these labels"))
            .field(FieldSpec::integer("per_page").range(1.0, 100.0))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIssueParams {
    pub owner: String,
    pub repo: String,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

impl OperationParams for CreateIssueParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field(FieldSpec::string("owner").required())
            .field(FieldSpec::string("repo").required())
            .field(FieldSpec::string("title").required().rule(Rule::Max(256.0)))
            .field(FieldSpec::string("body"))
            .field(FieldSpec::array("labels"))
            .field(FieldSpec::array("assignees").rule(Rule::Max(10.0)))
    }
}

pub fn get_me(_ctx: &Context, _params: NoParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/user"))
}

pub fn list_repos(_ctx: &Context, params: ListReposParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/user/repos")
        .query_opt("visibility", params.visibility)
        .query_opt("sort", params.sort)
        .query_opt("per_page", params.per_page)
        .query_opt("page", params.page))
}

pub fn get_repo(_ctx: &Context, params: RepoParams) -> Result<CallSpec, AdapterError> {
    Ok(CallSpec::get("/repos/{owner}/{repo}")
        .path_param("owner", params.owner)
        .path_param("repo", params.repo))
}

pub fn list_issues(_ctx: &Context, params: ListIssuesParams) -> Result<CallSpec, AdapterError> {
    let labels = (!params.labels.is_empty()).then(|| params.labels.join(","));
    Ok(CallSpec::get("/repos/{owner}/{repo}/issues")
        .path_param("owner", params.owner)
        .path_param("repo", params.repo)
        .query_opt("state", params.state)
        .query_opt("labels", labels)
        .query_opt("per_page", params.per_page))
}

pub fn create_issue(_ctx: &Context, params: CreateIssueParams) -> Result<CallSpec, AdapterError> {
    let mut body = Map::new();
    body.insert("title".into(), Value::String(params.title));
    if let Some(text) = params.body {
        body.insert("body".into(), Value::String(text));
    }
    if !params.labels.is_empty() {
        body.insert("labels".into(), params.labels.into());
    }
    if !params.assignees.is_empty() {
        body.insert("assignees".into(), params.assignees.into());
    }
    Ok(CallSpec::post("/repos/{owner}/{repo}/issues")
        .path_param("owner", params.owner)
        .path_param("repo", params.repo)
        .json_body(Value::Object(body)))
}

#[derive(Debug)]
pub struct GitHubAdapter {
    base: BaseAdapter,
    oauth: OAuthFlow,
}

impl GitHubAdapter {
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
                auth_style: ClientAuthStyle::RequestBody,
            },
        )?;

        let rest = settings
            .rest_config()
            .with_header("Accept", "application/vnd.github+json")
            .with_header("X-GitHub-Api-Version", API_VERSION);
        let mut base = BaseAdapter::new(config, &settings, rest, default_permissions())?;

        base.register_operation(
            OperationSpec::new("get_me", "Get authenticated user").category("user"),
            get_me,
        );
        base.register_operation(
            OperationSpec::new("list_repos", "List repositories")
                .description("Repositories the authenticated user can access")
                .category("repositories")
                .requires(&["read_repos"]),
            list_repos,
        );
        base.register_operation(
            OperationSpec::new("get_repo", "Get repository")
                .category("repositories")
                .requires(&["read_repos"]),
            get_repo,
        );
        base.register_operation(
            OperationSpec::new("list_issues", "List issues")
                .category("issues")
                .requires(&["read_issues"]),
            list_issues,
        );
        base.register_operation(
            OperationSpec::new("create_issue", "Create issue")
                .category("issues")
                .requires(&["write_issues"]),
            create_issue,
        );

        Ok(Self { base, oauth })
    }

    pub fn base(&self) -> &BaseAdapter {
        &self.base
    }
}

#[async_trait]
impl Adapter for GitHubAdapter {
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
impl OAuthAdapter for GitHubAdapter {
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
        _code_challenge: Option<&str>,
    ) -> Result<Url, AdapterError> {
        self.oauth.authorization_url(redirect_uri, state, scopes, None)
    }

    async fn exchange_code_for_tokens(
        &self,
        ctx: &Context,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<OAuthToken, AdapterError> {
        self.oauth.exchange_code(ctx, code, redirect_uri, None).await
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
pub struct GitHubTemplate {
    defaults: AdapterDefaults,
}

impl GitHubTemplate {
    pub fn new(defaults: AdapterDefaults) -> Self {
        Self { defaults }
    }
}

impl AdapterTemplate for GitHubTemplate {
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
        let adapter = GitHubAdapter::new(config, &self.defaults)?;
        Ok(AdapterHandle::OAuth(Arc::new(adapter)))
    }
}
