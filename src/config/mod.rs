//! Configuration loading for the adapter runtime.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ADAPTERS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::base::{AdapterDefaults, RetrySettings};
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::RateLimitConfig;

const ENV_PREFIX: &str = "ADAPTERS_";

/// Application configuration derived from `ADAPTERS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// JSON catalogue of providers, configuration records and translations
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

/// Default circuit breaker applied to every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CircuitBreakerSettings {
    /// Environment variable: `ADAPTERS_CIRCUIT_BREAKER_FAILURE_THRESHOLD`
    #[serde(default = "default_breaker_failure_threshold")]
    pub failure_threshold: u32,
    /// Environment variable: `ADAPTERS_CIRCUIT_BREAKER_RESET_TIMEOUT_SECONDS`
    #[serde(default = "default_breaker_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
    /// Environment variable: `ADAPTERS_CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS`
    #[serde(default = "default_breaker_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_failure_threshold(),
            reset_timeout_seconds: default_breaker_reset_timeout_seconds(),
            half_open_max_calls: default_breaker_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidBreakerThreshold {
                value: self.failure_threshold,
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::InvalidBreakerHalfOpenCalls {
                value: self.half_open_max_calls,
            });
        }
        Ok(())
    }
}

/// Default retry policy applied to every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryConfig {
    /// Total attempts including the first one.
    ///
    /// Environment variable: `ADAPTERS_RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Environment variable: `ADAPTERS_RETRY_INITIAL_BACKOFF_MS`
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Environment variable: `ADAPTERS_RETRY_MAX_BACKOFF_MS`
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Environment variable: `ADAPTERS_RETRY_BACKOFF_FACTOR`
    #[serde(default = "default_retry_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
            backoff_factor: default_retry_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.max_attempts,
            });
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidRetryBackoffBounds {
                initial: self.initial_backoff_ms,
                max: self.max_backoff_ms,
            });
        }
        if !(1.0..=10.0).contains(&self.backoff_factor) {
            return Err(ConfigError::InvalidRetryBackoffFactor {
                value: self.backoff_factor,
            });
        }
        Ok(())
    }
}

/// Rate limiting of outbound calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitSettings {
    /// Environment variable: `ADAPTERS_RATE_LIMIT_ENABLED`
    #[serde(default)]
    pub enabled: bool,
    /// Environment variable: `ADAPTERS_RATE_LIMIT_REQUESTS_PER_SECOND`
    #[serde(default = "default_rate_limit_requests_per_second")]
    pub requests_per_second: u32,
    /// Environment variable: `ADAPTERS_RATE_LIMIT_BURST`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    /// Provider-specific limits, applied even when the global limit is disabled.
    ///
    /// Environment variables:
    /// `ADAPTERS_RATE_LIMIT_OVERRIDE_{PROVIDER}_REQUESTS_PER_SECOND` and
    /// `ADAPTERS_RATE_LIMIT_OVERRIDE_{PROVIDER}_BURST`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_overrides: BTreeMap<String, RateLimitProviderOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitProviderOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: default_rate_limit_requests_per_second(),
            burst: None,
            provider_overrides: BTreeMap::new(),
        }
    }
}

impl RateLimitSettings {
    /// Validate rate limit bounds, including provider overrides
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit {
                provider: None,
                value: 0,
            });
        }
        if self.burst == Some(0) {
            return Err(ConfigError::InvalidRateLimitBurst { provider: None });
        }

        for (provider, override_config) in &self.provider_overrides {
            if override_config.requests_per_second == Some(0) {
                return Err(ConfigError::InvalidRateLimit {
                    provider: Some(provider.clone()),
                    value: 0,
                });
            }
            if override_config.burst == Some(0) {
                return Err(ConfigError::InvalidRateLimitBurst {
                    provider: Some(provider.clone()),
                });
            }
        }

        Ok(())
    }

    fn global(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_second: self.requests_per_second,
            burst: self.burst,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            catalog_path: default_catalog_path(),
            http_timeout_seconds: default_http_timeout_seconds(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl AppConfig {
    /// Returns a JSON representation with credentials stripped from a
    /// catalogue URL.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if let Ok(mut url) = url::Url::parse(&config.catalog_path.to_string_lossy()) {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("");
                let _ = url.set_password(None);
                config.catalog_path = PathBuf::from(url.to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.http_timeout_seconds == 0 || self.http_timeout_seconds > 600 {
            return Err(ConfigError::InvalidHttpTimeout {
                value: self.http_timeout_seconds,
            });
        }

        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.rate_limit.validate()?;

        Ok(())
    }
}

impl From<&AppConfig> for AdapterDefaults {
    fn from(config: &AppConfig) -> Self {
        let rate_limit_overrides = config
            .rate_limit
            .provider_overrides
            .iter()
            .map(|(provider, o)| {
                let limit = RateLimitConfig {
                    requests_per_second: o
                        .requests_per_second
                        .unwrap_or(config.rate_limit.requests_per_second),
                    burst: o.burst.or(config.rate_limit.burst),
                };
                (provider.clone(), limit)
            })
            .collect();

        AdapterDefaults {
            http_timeout: Duration::from_secs(config.http_timeout_seconds),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                reset_timeout: Duration::from_secs(config.circuit_breaker.reset_timeout_seconds),
                half_open_max_calls: config.circuit_breaker.half_open_max_calls,
            },
            retry: RetrySettings {
                max_attempts: config.retry.max_attempts,
                initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
                backoff_factor: config.retry.backoff_factor,
            },
            rate_limit: config
                .rate_limit
                .enabled
                .then(|| config.rate_limit.global()),
            rate_limit_overrides,
        }
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_reset_timeout_seconds() -> u64 {
    60
}

fn default_breaker_half_open_max_calls() -> u32 {
    1
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    200
}

fn default_retry_max_backoff_ms() -> u64 {
    10_000
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_rate_limit_requests_per_second() -> u32 {
    10
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("http timeout must be between 1 and 600 seconds, got {value}")]
    InvalidHttpTimeout { value: u64 },
    #[error("circuit breaker failure threshold must be positive, got {value}")]
    InvalidBreakerThreshold { value: u32 },
    #[error("circuit breaker half-open call limit must be positive, got {value}")]
    InvalidBreakerHalfOpenCalls { value: u32 },
    #[error("retry max attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("retry initial backoff ({initial}ms) cannot be greater than max backoff ({max}ms)")]
    InvalidRetryBackoffBounds { initial: u64, max: u64 },
    #[error("retry backoff factor must be between 1.0 and 10.0, got {value}")]
    InvalidRetryBackoffFactor { value: f64 },
    #[error("rate limit for {} must be positive, got {value}", provider.as_deref().unwrap_or("all providers"))]
    InvalidRateLimit {
        provider: Option<String>,
        value: u32,
    },
    #[error("rate limit burst for {} must be positive", provider.as_deref().unwrap_or("all providers"))]
    InvalidRateLimitBurst { provider: Option<String> },
}

/// Loads configuration using layered `.env` files and `ADAPTERS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates the configuration. Later layers win:
    /// `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`, then
    /// the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT")
            .map(|v| v.to_lowercase())
            .unwrap_or_else(default_log_format);
        let catalog_path = take_string(&mut layered, "CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_catalog_path);
        let http_timeout_seconds = take_parsed(&mut layered, "HTTP_TIMEOUT_SECONDS")?
            .unwrap_or_else(default_http_timeout_seconds);

        let circuit_breaker = CircuitBreakerSettings {
            failure_threshold: take_parsed(&mut layered, "CIRCUIT_BREAKER_FAILURE_THRESHOLD")?
                .unwrap_or_else(default_breaker_failure_threshold),
            reset_timeout_seconds: take_parsed(
                &mut layered,
                "CIRCUIT_BREAKER_RESET_TIMEOUT_SECONDS",
            )?
            .unwrap_or_else(default_breaker_reset_timeout_seconds),
            half_open_max_calls: take_parsed(&mut layered, "CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS")?
                .unwrap_or_else(default_breaker_half_open_max_calls),
        };

        let retry = RetryConfig {
            max_attempts: take_parsed(&mut layered, "RETRY_MAX_ATTEMPTS")?
                .unwrap_or_else(default_retry_max_attempts),
            initial_backoff_ms: take_parsed(&mut layered, "RETRY_INITIAL_BACKOFF_MS")?
                .unwrap_or_else(default_retry_initial_backoff_ms),
            max_backoff_ms: take_parsed(&mut layered, "RETRY_MAX_BACKOFF_MS")?
                .unwrap_or_else(default_retry_max_backoff_ms),
            backoff_factor: take_parsed(&mut layered, "RETRY_BACKOFF_FACTOR")?
                .unwrap_or_else(default_retry_backoff_factor),
        };

        // Parse provider-specific overrides: RATE_LIMIT_OVERRIDE_<PROVIDER>_<SETTING>
        let mut provider_overrides: BTreeMap<String, RateLimitProviderOverride> = BTreeMap::new();
        let override_keys: Vec<String> = layered
            .keys()
            .filter(|key| key.starts_with("RATE_LIMIT_OVERRIDE_"))
            .cloned()
            .collect();
        for key in override_keys {
            let Some(suffix) = key.strip_prefix("RATE_LIMIT_OVERRIDE_") else {
                continue;
            };
            if let Some(provider) = suffix.strip_suffix("_REQUESTS_PER_SECOND") {
                let provider = provider.to_lowercase();
                let value = take_parsed(&mut layered, &key)?;
                provider_overrides.entry(provider).or_default().requests_per_second = value;
            } else if let Some(provider) = suffix.strip_suffix("_BURST") {
                let provider = provider.to_lowercase();
                let value = take_parsed(&mut layered, &key)?;
                provider_overrides.entry(provider).or_default().burst = value;
            }
        }

        let rate_limit = RateLimitSettings {
            enabled: take_parsed(&mut layered, "RATE_LIMIT_ENABLED")?.unwrap_or(false),
            requests_per_second: take_parsed(&mut layered, "RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or_else(default_rate_limit_requests_per_second),
            burst: take_parsed(&mut layered, "RATE_LIMIT_BURST")?,
            provider_overrides,
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            catalog_path,
            http_timeout_seconds,
            circuit_breaker,
            retry,
            rate_limit,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(values, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
    }
}
