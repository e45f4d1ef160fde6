//! Shared adapter scaffolding
//!
//! [`BaseAdapter`] owns everything a concrete adapter has in common: the
//! provider info, the permission set, the operation table keyed by operation
//! id, the REST transport and the resilience guard. Concrete adapters embed
//! it, register their typed handlers once in their constructor and delegate
//! `execute` to one of the auth-specific pipelines below.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug, info_span};

use crate::adapters::metadata::{OperationDescriptor, ProviderAdapterConfig, ProviderAdapterInfo};
use crate::adapters::trait_::{Credential, OAuthToken};
use crate::context::Context;
use crate::error::AdapterError;
use crate::params::{OperationParams, ParamSchema};
use crate::permissions::{Permission, PermissionSet};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter, ResilienceGuard,
    RetryPolicy,
};
use crate::transport::{CallSpec, RestConfig, RestTransport};

type PrepareFn = Box<
    dyn Fn(&BaseAdapter, &Context, &str, &Map<String, Value>) -> Result<CallSpec, AdapterError>
        + Send
        + Sync,
>;

/// Static description of an operation handed to [`BaseAdapter::register_operation`].
#[derive(Debug, Clone)]
pub struct OperationSpec {
    identifier: String,
    name: String,
    description: String,
    category: String,
    required_permissions: Vec<String>,
}

impl OperationSpec {
    pub fn new(identifier: &str, name: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: String::new(),
            required_permissions: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn requires(mut self, permission_ids: &[&str]) -> Self {
        self.required_permissions = permission_ids.iter().map(|id| id.to_string()).collect();
        self
    }
}

struct RegisteredOperation {
    descriptor: OperationDescriptor,
    prepare: PrepareFn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy<AdapterError> {
        RetryPolicy::for_adapters(self.max_attempts)
            .with_backoff(self.initial_backoff, self.max_backoff)
            .with_factor(self.backoff_factor)
    }
}

/// Process-wide defaults applied when a configuration record does not override them.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterDefaults {
    pub http_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetrySettings,
    pub rate_limit: Option<RateLimitConfig>,
    /// Per-provider rate limits keyed by provider identifier
    pub rate_limit_overrides: BTreeMap<String, RateLimitConfig>,
}

impl Default for AdapterDefaults {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetrySettings::default(),
            rate_limit: None,
            rate_limit_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BreakerOverride {
    failure_threshold: Option<u32>,
    reset_timeout_seconds: Option<u64>,
    half_open_max_calls: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryOverride {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_factor: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitOverride {
    requests_per_second: u32,
    burst: Option<u32>,
}

/// Effective runtime settings of one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetrySettings,
    pub rate_limit: Option<RateLimitConfig>,
}

impl AdapterSettings {
    /// Resolve settings from the record's custom config, falling back to `defaults`.
    pub fn resolve(
        config: &ProviderAdapterConfig,
        defaults: &AdapterDefaults,
        default_base_url: &str,
    ) -> Result<Self, AdapterError> {
        let base_url = config
            .custom_str("base_url")
            .unwrap_or(default_base_url)
            .to_string();

        let timeout = custom::<u64>(config, "timeout_seconds")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let mut circuit_breaker = defaults.circuit_breaker.clone();
        if let Some(o) = custom::<BreakerOverride>(config, "circuit_breaker")? {
            if let Some(v) = o.failure_threshold {
                circuit_breaker.failure_threshold = v.max(1);
            }
            if let Some(v) = o.reset_timeout_seconds {
                circuit_breaker.reset_timeout = Duration::from_secs(v);
            }
            if let Some(v) = o.half_open_max_calls {
                circuit_breaker.half_open_max_calls = v.max(1);
            }
        }

        let mut retry = defaults.retry.clone();
        if let Some(o) = custom::<RetryOverride>(config, "retry")? {
            if let Some(v) = o.max_attempts {
                retry.max_attempts = v.max(1);
            }
            if let Some(v) = o.initial_backoff_ms {
                retry.initial_backoff = Duration::from_millis(v);
            }
            if let Some(v) = o.max_backoff_ms {
                retry.max_backoff = Duration::from_millis(v);
            }
            if let Some(v) = o.backoff_factor {
                retry.backoff_factor = v;
            }
        }

        let rate_limit = match custom::<RateLimitOverride>(config, "rate_limit")? {
            Some(o) => Some(RateLimitConfig {
                requests_per_second: o.requests_per_second,
                burst: o.burst,
            }),
            None => defaults
                .rate_limit_overrides
                .get(config.identifier())
                .or(defaults.rate_limit.as_ref())
                .cloned(),
        };
        if let Some(limit) = &rate_limit {
            limit.validate().map_err(|e| {
                AdapterError::invalid_parameters(format!("invalid custom_config.rate_limit: {}", e))
                    .for_provider(config.identifier())
            })?;
        }

        Ok(Self {
            base_url,
            timeout,
            circuit_breaker,
            retry,
            rate_limit,
        })
    }

    /// Transport settings seeded with the resolved base URL and timeout.
    pub fn rest_config(&self) -> RestConfig {
        RestConfig::new(self.base_url.clone()).with_timeout(self.timeout)
    }
}

fn custom<T: DeserializeOwned>(
    config: &ProviderAdapterConfig,
    key: &str,
) -> Result<Option<T>, AdapterError> {
    match config.custom_config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            AdapterError::invalid_parameters(format!("invalid custom_config.{}: {}", key, e))
                .for_provider(config.identifier())
        }),
    }
}

pub struct BaseAdapter {
    info: ProviderAdapterInfo,
    derive_operations: bool,
    permissions: PermissionSet,
    operations: HashMap<String, RegisteredOperation>,
    schemas: HashMap<String, ParamSchema>,
    transport: RestTransport,
    guard: ResilienceGuard,
}

impl std::fmt::Debug for BaseAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAdapter")
            .field("provider", &self.info.identifier)
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl BaseAdapter {
    /// `default_permissions` apply when the configuration record carries none.
    pub fn new(
        config: &ProviderAdapterConfig,
        settings: &AdapterSettings,
        rest: RestConfig,
        default_permissions: Vec<Permission>,
    ) -> Result<Self, AdapterError> {
        let mut info = config.info.clone();
        if info.permissions.is_empty() {
            info.permissions = default_permissions;
        }
        let derive_operations = info.operations.is_empty();
        let permissions = PermissionSet::new(info.permissions.iter().cloned());
        let transport = RestTransport::new(info.identifier.clone(), rest)?;

        let limiter = settings
            .rate_limit
            .as_ref()
            .map(RateLimiter::new)
            .transpose()
            .map_err(|e| {
                AdapterError::invalid_parameters(e.to_string()).for_provider(&info.identifier)
            })?;
        let guard = ResilienceGuard::new(
            CircuitBreaker::new(info.identifier.clone(), settings.circuit_breaker.clone()),
            settings.retry.policy(),
            limiter,
        );

        Ok(Self {
            info,
            derive_operations,
            permissions,
            operations: HashMap::new(),
            schemas: HashMap::new(),
            transport,
            guard,
        })
    }

    pub fn info(&self) -> &ProviderAdapterInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn guard(&self) -> &ResilienceGuard {
        &self.guard
    }

    pub fn transport(&self) -> &RestTransport {
        &self.transport
    }

    /// Register a typed handler. The parameter schema is captured here and
    /// used to decode every call to `identifier`.
    pub fn register_operation<P, F>(&mut self, spec: OperationSpec, handler: F)
    where
        P: OperationParams,
        F: Fn(&Context, P) -> Result<CallSpec, AdapterError> + Send + Sync + 'static,
    {
        let schema = P::schema();
        let descriptor = OperationDescriptor {
            identifier: spec.identifier.clone(),
            name: spec.name,
            description: spec.description,
            category: spec.category,
            parameters: schema.descriptors(),
            required_permissions: spec.required_permissions,
        };

        if self.derive_operations {
            self.info.operations.push(descriptor.clone());
        }

        let prepare: PrepareFn = Box::new(move |base, ctx, operation_id, raw| {
            let params = base.process_params::<P>(operation_id, raw)?;
            handler(ctx, params)
        });
        self.schemas.insert(spec.identifier.clone(), schema);
        self.operations.insert(
            spec.identifier,
            RegisteredOperation {
                descriptor,
                prepare,
            },
        );
    }

    /// Decode and validate raw parameters against the registered schema of `operation_id`.
    pub fn process_params<P: OperationParams>(
        &self,
        operation_id: &str,
        raw: &Map<String, Value>,
    ) -> Result<P, AdapterError> {
        let schema = self
            .schemas
            .get(operation_id)
            .ok_or_else(|| AdapterError::operation_not_supported(operation_id))?;
        schema.decode::<P>(raw).map_err(|e| {
            AdapterError::invalid_parameters(format!("invalid parameters: {}", e)).with_raw(
                json!({"field": e.field, "constraint": e.constraint, "message": e.message}),
            )
        })
    }

    pub fn operation(&self, operation_id: &str) -> Result<&OperationDescriptor, AdapterError> {
        self.operations
            .get(operation_id)
            .map(|op| &op.descriptor)
            .ok_or_else(|| AdapterError::operation_not_supported(operation_id))
    }

    pub fn operation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `(all_present, missing_ids)` for the permissions `operation_id` requires.
    pub fn missing_permissions(
        &self,
        operation_id: &str,
        authorized_scopes: &[String],
    ) -> Result<(bool, BTreeSet<String>), AdapterError> {
        let descriptor = self.operation(operation_id)?;
        Ok(self
            .permissions
            .check_missing_by_ids(&descriptor.required_permissions, authorized_scopes))
    }

    fn check_permissions(
        &self,
        operation_id: &str,
        authorized_scopes: &[String],
    ) -> Result<(), AdapterError> {
        let (all_present, missing) = self.missing_permissions(operation_id, authorized_scopes)?;
        if all_present {
            return Ok(());
        }
        let missing: Vec<String> = missing.into_iter().collect();
        Err(AdapterError::credential(format!(
            "missing required permissions: {}",
            missing.join(", ")
        ))
        .with_status(403)
        .with_raw(json!({ "missing_permissions": missing })))
    }

    /// Decode params and run the handler, producing the call spec.
    pub fn prepare(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
    ) -> Result<CallSpec, AdapterError> {
        let op = self
            .operations
            .get(operation_id)
            .ok_or_else(|| AdapterError::operation_not_supported(operation_id))?;
        (op.prepare)(self, ctx, operation_id, params)
    }

    /// Send a prepared call through the resilience guard and the transport.
    /// Rate limits are bucketed per provider and caller `subject`.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        operation_id: &str,
        subject: &str,
        spec: CallSpec,
    ) -> Result<Value, AdapterError> {
        let spec = &spec;
        let limiter_key = format!("{}:{}", self.info.identifier, subject);
        self.guard
            .run(ctx, &limiter_key, || {
                self.transport.execute(ctx, operation_id, spec)
            })
            .await
    }

    /// Prepare, let `inject` add authentication, then dispatch.
    pub async fn run_operation<F>(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
        inject: F,
    ) -> Result<Value, AdapterError>
    where
        F: FnOnce(&mut CallSpec),
    {
        let span = info_span!(
            "adapter_execute",
            provider = %self.info.identifier,
            operation = %operation_id,
            trace_id = %ctx.trace_id(),
        );
        async {
            let mut spec = self.prepare(ctx, operation_id, params)?;
            inject(&mut spec);
            debug!(method = ?spec.method, path = %spec.path, "Prepared provider call");
            self.dispatch(ctx, operation_id, &credential.subject(), spec)
                .await
        }
        .instrument(span)
        .await
        .map_err(|e| e.scoped(&self.info.identifier, operation_id))
    }

    /// OAuth pipeline: token check, operation lookup, permission check, then Bearer injection.
    pub async fn execute_oauth(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<Value, AdapterError> {
        let scoped = |e: AdapterError| e.scoped(&self.info.identifier, operation_id);
        let (token, scopes) = match credential {
            Credential::OAuth { token, scopes } if !token.access_token.is_empty() => {
                (token, scopes)
            }
            _ => {
                return Err(scoped(AdapterError::credential(
                    "an OAuth access token is required",
                )));
            }
        };
        self.check_permissions(operation_id, scopes).map_err(scoped)?;

        let bearer = bearer_header(token);
        self.run_operation(ctx, operation_id, params, credential, |spec| {
            spec.set_header("Authorization", bearer);
        })
        .await
    }

    /// API-key pipeline: key check, then `inject` places the key.
    pub async fn execute_api_key<F>(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
        inject: F,
    ) -> Result<Value, AdapterError>
    where
        F: FnOnce(&mut CallSpec, &str),
    {
        let key = match credential {
            Credential::ApiKey { api_key } if !api_key.is_empty() => api_key.as_str(),
            _ => {
                return Err(AdapterError::credential("an API key is required")
                    .scoped(&self.info.identifier, operation_id));
            }
        };
        self.run_operation(ctx, operation_id, params, credential, |spec| {
            inject(spec, key)
        })
        .await
    }

    /// Basic-auth pipeline: credential check, `Authorization: Basic`, then `inject` for extras.
    pub async fn execute_basic<F>(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &Credential,
        inject: F,
    ) -> Result<Value, AdapterError>
    where
        F: FnOnce(&mut CallSpec, &str),
    {
        let (username, password) = match credential {
            Credential::Basic { username, password } if !username.is_empty() => {
                (username.as_str(), password.as_str())
            }
            _ => {
                return Err(AdapterError::credential("basic credentials are required")
                    .scoped(&self.info.identifier, operation_id));
            }
        };
        self.run_operation(ctx, operation_id, params, credential, |spec| {
            spec.set_header("Authorization", basic_auth_header(username, password));
            inject(spec, username);
        })
        .await
    }

    /// Public pipeline: no authentication.
    pub async fn execute_public(
        &self,
        ctx: &Context,
        operation_id: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, AdapterError> {
        self.run_operation(ctx, operation_id, params, &Credential::None, |_| {})
            .await
    }
}

fn bearer_header(token: &OAuthToken) -> String {
    format!("Bearer {}", token.access_token)
}

/// `Basic base64(username:password)`
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::metadata::AuthType;
    use crate::error::ErrorCode;
    use crate::params::{FieldSpec, NoParams};

    #[derive(Debug, Deserialize)]
    struct EchoParams {
        name: String,
    }

    impl OperationParams for EchoParams {
        fn schema() -> ParamSchema {
            ParamSchema::new().field(FieldSpec::string("name").required())
        }
    }

    fn base() -> BaseAdapter {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            "echo",
            "Echo",
            AuthType::OAuth,
        ))
        .with_custom("retry", json!({"max_attempts": 1}));
        let settings =
            AdapterSettings::resolve(&config, &AdapterDefaults::default(), "http://localhost:9")
                .unwrap();
        let mut base = BaseAdapter::new(
            &config,
            &settings,
            settings.rest_config(),
            vec![Permission::new("read", "Read", ["echo:read"])],
        )
        .unwrap();
        base.register_operation(
            OperationSpec::new("echo", "Echo").requires(&["read"]),
            |_ctx, params: EchoParams| Ok(CallSpec::get("/echo/{name}").path_param("name", params.name)),
        );
        base.register_operation(OperationSpec::new("ping", "Ping"), |_ctx, _: NoParams| {
            Ok(CallSpec::get("/ping"))
        });
        base
    }

    #[test]
    fn test_operations_are_derived_from_registrations() {
        let base = base();
        assert_eq!(base.operation_ids(), vec!["echo", "ping"]);
        let echo = base.info().operation("echo").unwrap();
        assert_eq!(echo.parameters.len(), 1);
        assert_eq!(echo.required_permissions, vec!["read"]);
        assert_eq!(base.permissions().len(), 1);
    }

    #[test]
    fn test_prepare_validates_params() {
        let base = base();
        let ctx = Context::background();

        let mut params = Map::new();
        params.insert("name".into(), json!("a b"));
        let spec = base.prepare(&ctx, "echo", &params).unwrap();
        assert_eq!(spec.path_params.get("name").map(String::as_str), Some("a b"));

        let error = base.prepare(&ctx, "echo", &Map::new()).unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidParameters);
        assert_eq!(error.http_status, 400);

        let error = base.prepare(&ctx, "nope", &Map::new()).unwrap_err();
        assert_eq!(error.code, ErrorCode::OperationNotSupported);
    }

    #[tokio::test]
    async fn test_oauth_pipeline_ordering() {
        let base = base();
        let ctx = Context::background();

        let error = base
            .execute_oauth(&ctx, "echo", &Map::new(), &Credential::None)
            .await
            .unwrap_err();
        assert_eq!((error.code, error.http_status), (ErrorCode::CredentialError, 401));
        assert_eq!(error.provider_id, "echo");

        let credential = Credential::oauth("tk", &[]);
        let error = base
            .execute_oauth(&ctx, "missing", &Map::new(), &credential)
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::OperationNotSupported);

        let error = base
            .execute_oauth(&ctx, "echo", &Map::new(), &credential)
            .await
            .unwrap_err();
        assert_eq!((error.code, error.http_status), (ErrorCode::CredentialError, 403));
        assert!(error.message.contains("read"));

        let credential = Credential::oauth("tk", &["echo:read"]);
        let error = base
            .execute_oauth(&ctx, "echo", &Map::new(), &credential)
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidParameters);
    }

    #[test]
    fn test_settings_from_custom_config() {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            "x",
            "X",
            AuthType::None,
        ))
        .with_custom("base_url", json!("http://mock"))
        .with_custom("timeout_seconds", json!(5))
        .with_custom("circuit_breaker", json!({"failure_threshold": 2}))
        .with_custom("rate_limit", json!({"requests_per_second": 4}));

        let settings =
            AdapterSettings::resolve(&config, &AdapterDefaults::default(), "http://default").unwrap();
        assert_eq!(settings.base_url, "http://mock");
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.circuit_breaker.failure_threshold, 2);
        assert_eq!(settings.circuit_breaker.reset_timeout, Duration::from_secs(60));
        assert_eq!(settings.rate_limit, Some(RateLimitConfig::new(4)));

        let bad = config.with_custom("retry", json!({"attempts": 3}));
        let error =
            AdapterSettings::resolve(&bad, &AdapterDefaults::default(), "http://default").unwrap_err();
        assert!(error.message.contains("custom_config.retry"));
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let config = ProviderAdapterConfig::new(ProviderAdapterInfo::new(
            "x",
            "X",
            AuthType::None,
        ))
        .with_custom("rate_limit", json!({"requests_per_second": 0}));
        let error = AdapterSettings::resolve(&config, &AdapterDefaults::default(), "http://default")
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidParameters);
        assert!(error.message.contains("requests_per_second must be positive"));
        assert_eq!(error.provider_id, "x");

        let mut defaults = AdapterDefaults::default();
        defaults
            .rate_limit_overrides
            .insert("y".into(), RateLimitConfig::new(3).with_burst(0));
        let config =
            ProviderAdapterConfig::new(ProviderAdapterInfo::new("y", "Y", AuthType::None));
        let error = AdapterSettings::resolve(&config, &defaults, "http://default").unwrap_err();
        assert!(error.message.contains("burst must be positive"));
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("sk_test", ""), "Basic c2tfdGVzdDo=");
    }
}
