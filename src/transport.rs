//! REST transport: turns a [`CallSpec`] into an HTTP request and classifies the outcome.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::context::Context;
use crate::error::{AdapterError, NetworkFailure, body_snippet};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Unreserved characters (RFC 3986) stay literal inside path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A query parameter value; multi-valued parameters repeat the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Single(value)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        QueryValue::Multi(values)
    }
}

/// Declarative description of one HTTP call, produced by operation handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSpec {
    pub method: HttpMethod,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_params: BTreeMap<String, String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, QueryValue>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
}

impl CallSpec {
    pub fn new<S: Into<String>>(method: HttpMethod, path: S) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: BTreeMap::new(),
            query_params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            full_url: None,
        }
    }

    pub fn get<S: Into<String>>(path: S) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post<S: Into<String>>(path: S) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn patch<S: Into<String>>(path: S) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete<S: Into<String>>(path: S) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn path_param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn query<K: Into<String>, V: Into<QueryValue>>(mut self, key: K, value: V) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Add a query parameter only when a value is present.
    pub fn query_opt<K: Into<String>, V: ToString>(self, key: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value.to_string()),
            None => self,
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a header, replacing any existing header with the same name regardless of case.
    pub fn set_header(&mut self, key: &str, value: String) {
        self.headers.retain(|name, _| !name.eq_ignore_ascii_case(key));
        self.headers.insert(key.to_string(), value);
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a pre-encoded `application/x-www-form-urlencoded` body.
    pub fn form_body(mut self, encoded: String) -> Self {
        self.body = Some(Value::String(encoded));
        self.header("Content-Type", CONTENT_TYPE_FORM)
    }

    pub fn with_full_url<S: Into<String>>(mut self, url: S) -> Self {
        self.full_url = Some(url.into());
        self
    }

    /// Decode a call spec from a plain mapping. Unknown keys are a contract violation.
    pub fn from_value(value: Value) -> Result<Self, AdapterError> {
        serde_json::from_value(value)
            .map_err(|e| AdapterError::internal(format!("malformed call spec: {}", e)))
    }

    /// Header value looked up case-insensitively.
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Final request URL: `full_url` verbatim or `base_url` joined with the
    /// substituted path, followed by the query string.
    pub fn resolve_url(&self, base_url: &str) -> Result<Url, AdapterError> {
        let raw = match &self.full_url {
            Some(full) => full.clone(),
            None => {
                let path = substitute_path(&self.path, &self.path_params)?;
                join_url(base_url, &path)
            }
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| AdapterError::internal(format!("invalid request URL '{}': {}", raw, e)))?;

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                match value {
                    QueryValue::Single(single) => {
                        pairs.append_pair(key, single);
                    }
                    QueryValue::Multi(values) => {
                        for single in values {
                            pairs.append_pair(key, single);
                        }
                    }
                }
            }
        }
        Ok(url)
    }
}

/// Replace `{name}` placeholders with percent-encoded path parameters.
pub fn substitute_path(
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, AdapterError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(AdapterError::internal(format!(
                "unterminated placeholder in path '{}'",
                template
            )));
        };
        let name = &after[..end];
        let value = params.get(name).ok_or_else(|| {
            AdapterError::internal(format!(
                "unresolved path placeholder '{{{}}}' in '{}'",
                name, template
            ))
        })?;
        out.push_str(&utf8_percent_encode(value, PATH_SEGMENT).to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Static transport settings of one adapter.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub default_headers: BTreeMap<String, String>,
    pub content_type: String,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: BTreeMap::new(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RestTransport {
    provider_id: String,
    config: RestConfig,
    client: reqwest::Client,
}

impl RestTransport {
    pub fn new<S: Into<String>>(provider_id: S, config: RestConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("adapters/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            client,
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Issue the call described by `spec` and return the parsed JSON body.
    pub async fn execute(
        &self,
        ctx: &Context,
        operation_id: &str,
        spec: &CallSpec,
    ) -> Result<Value, AdapterError> {
        let span = info_span!(
            "rest_call",
            provider = %self.provider_id,
            operation = %operation_id,
            method = ?spec.method,
            trace_id = %ctx.trace_id(),
        );
        self.execute_inner(ctx, operation_id, spec)
            .instrument(span)
            .await
            .map_err(|e| e.scoped(&self.provider_id, operation_id))
    }

    async fn execute_inner(
        &self,
        ctx: &Context,
        operation_id: &str,
        spec: &CallSpec,
    ) -> Result<Value, AdapterError> {
        let url = spec.resolve_url(&self.config.base_url)?;
        let mut headers = self.merge_headers(spec)?;
        let content_type = spec
            .header_value("content-type")
            .unwrap_or(&self.config.content_type)
            .to_string();

        let body = match &spec.body {
            Some(body) => {
                let value = HeaderValue::from_str(&content_type).map_err(|e| {
                    AdapterError::encoding(format!("invalid content type '{}': {}", content_type, e))
                })?;
                headers.insert(CONTENT_TYPE, value);
                Some(encode_body(body, &content_type)?)
            }
            None => None,
        };

        let mut request = self
            .client
            .request(spec.method.as_reqwest(), url.clone())
            .headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        if let Some(remaining) = ctx.remaining() {
            if remaining < self.config.timeout {
                request = request.timeout(remaining);
            }
        }

        let labels = vec![
            ("provider", self.provider_id.clone()),
            ("operation", operation_id.to_string()),
        ];
        metrics::counter!("adapter_requests_total", &labels).increment(1);
        debug!(url = %url, "Sending provider request");

        let started = Instant::now();
        let sent = tokio::select! {
            _ = ctx.done() => {
                metrics::counter!("adapter_request_failures_total", &labels).increment(1);
                return Err(AdapterError::timeout("request cancelled by caller"));
            }
            sent = request.send() => sent,
        };
        let result = match sent {
            Ok(response) => self.read_response(response).await,
            Err(error) => Err(classify_network_error(&error)),
        };

        metrics::histogram!("adapter_request_latency_ms", &labels)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if let Err(error) = &result {
            metrics::counter!("adapter_request_failures_total", &labels).increment(1);
            warn!(
                code = %error.code,
                status = error.http_status,
                "Provider request failed"
            );
        }
        result
    }

    fn merge_headers(&self, spec: &CallSpec) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        for (key, value) in self.config.default_headers.iter().chain(spec.headers.iter()) {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| AdapterError::encoding(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AdapterError::encoding(format!("invalid value for header '{}': {}", key, e))
            })?;
            // later inserts win: spec headers override defaults
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn read_response(&self, response: reqwest::Response) -> Result<Value, AdapterError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_network_error(&e))?;

        if status.is_success() {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                let text = String::from_utf8_lossy(&bytes);
                AdapterError::decoding(format!("failed to decode response body: {}", e))
                    .with_status(status.as_u16())
                    .with_raw(Value::String(body_snippet(&text)))
            });
        }

        let text = String::from_utf8_lossy(&bytes).to_string();
        let raw = serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(body_snippet(&text)));
        Err(classify_status(&self.provider_id, status.as_u16(), &text).with_raw(raw))
    }
}

/// Map an HTTP status (non-2xx) onto the error taxonomy.
pub fn classify_status(provider_id: &str, status: u16, body: &str) -> AdapterError {
    let message = format!(
        "{} returned HTTP {}: {}",
        provider_id,
        status,
        body_snippet(body)
    );
    let error = match status {
        401 | 403 | 407 => AdapterError::credential(message),
        429 => AdapterError::provider_api(message),
        400..=499 => AdapterError::invalid_parameters(message),
        _ => AdapterError::provider_api(message),
    };
    error.with_status(status)
}

fn classify_network_error(error: &reqwest::Error) -> AdapterError {
    if error.is_timeout() {
        AdapterError::timeout(format!("request timed out: {}", error))
            .with_network(NetworkFailure::Timeout)
    } else if error.is_connect() {
        AdapterError::provider_api(format!("connection failed: {}", error))
            .with_status(503)
            .with_network(NetworkFailure::Connect)
    } else {
        AdapterError::provider_api(format!("network error: {}", error))
            .with_status(503)
            .with_network(NetworkFailure::Other)
    }
}

fn encode_body(body: &Value, content_type: &str) -> Result<Vec<u8>, AdapterError> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == CONTENT_TYPE_JSON || mime.ends_with("+json") {
        return serde_json::to_vec(body)
            .map_err(|e| AdapterError::encoding(format!("failed to encode JSON body: {}", e)));
    }

    if mime == CONTENT_TYPE_FORM {
        return match body {
            Value::String(encoded) => Ok(encoded.clone().into_bytes()),
            Value::Object(map) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in map {
                    match value {
                        Value::Null => {}
                        Value::String(s) => {
                            serializer.append_pair(key, s);
                        }
                        Value::Array(items) => {
                            for item in items {
                                serializer.append_pair(key, &scalar_to_string(item)?);
                            }
                        }
                        other => {
                            serializer.append_pair(key, &scalar_to_string(other)?);
                        }
                    }
                }
                Ok(serializer.finish().into_bytes())
            }
            _ => Err(AdapterError::encoding(
                "form bodies must be a pre-encoded string or a mapping",
            )),
        };
    }

    Err(AdapterError::encoding(format!(
        "unsupported content type '{}' for request body",
        content_type
    )))
}

fn scalar_to_string(value: &Value) -> Result<String, AdapterError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(AdapterError::encoding(
            "nested values cannot be form-encoded",
        )),
    }
}
