//! # Error Handling
//!
//! Every failure the runtime surfaces across the adapter boundary is an
//! [`AdapterError`]: a provider id, an operation id, a stable error code from
//! the taxonomy below, a human readable message, an advisory HTTP status and
//! the raw upstream payload when one exists.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of characters of an upstream body kept in error messages.
const BODY_SNIPPET_CHARS: usize = 200;

/// Stable error codes surfaced by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing, invalid, expired or insufficient credentials; OAuth refresh/exchange failures.
    CredentialError,
    /// The remote provider returned a non-success response or the network call failed.
    ProviderApiError,
    /// Parameter validation failed at the adapter boundary.
    InvalidParameters,
    /// The request body could not be serialized.
    EncodingError,
    /// The response body could not be parsed.
    DecodingError,
    /// A configuration record was missing a required attribute.
    MissingRequiredField,
    /// The operation id is not registered for this provider.
    OperationNotSupported,
    /// The operation exceeded its deadline or was cancelled.
    Timeout,
    /// The circuit breaker refused the call.
    CircuitOpen,
    /// An invariant of the runtime was violated.
    Internal,
    /// An error escaped classification.
    Unknown,
}

impl ErrorCode {
    /// Snake-case wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CredentialError => "credential_error",
            ErrorCode::ProviderApiError => "provider_api_error",
            ErrorCode::InvalidParameters => "invalid_parameters",
            ErrorCode::EncodingError => "encoding_error",
            ErrorCode::DecodingError => "decoding_error",
            ErrorCode::MissingRequiredField => "missing_required_field",
            ErrorCode::OperationNotSupported => "operation_not_supported",
            ErrorCode::Timeout => "timeout",
            ErrorCode::CircuitOpen => "circuit_open",
            ErrorCode::Internal => "internal",
            ErrorCode::Unknown => "unknown",
        }
    }

    /// Advisory HTTP status used when the producer does not supply one.
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorCode::CredentialError => 401,
            ErrorCode::ProviderApiError => 502,
            ErrorCode::InvalidParameters => 400,
            ErrorCode::EncodingError => 500,
            ErrorCode::DecodingError => 502,
            ErrorCode::MissingRequiredField => 400,
            ErrorCode::OperationNotSupported => 404,
            ErrorCode::Timeout => 504,
            ErrorCode::CircuitOpen => 503,
            ErrorCode::Internal => 500,
            ErrorCode::Unknown => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-level failure observed by the transport before any HTTP status was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// Connection refused, reset, or no route to host.
    Connect,
    /// The HTTP client gave up waiting for the remote side.
    Timeout,
    /// Any other request-level I/O failure (closed connection, body read error).
    Other,
}

/// Error record produced wherever the runtime surfaces a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code} [{provider_id}/{operation_id}] (status {http_status}): {message}")]
pub struct AdapterError {
    pub provider_id: String,
    pub operation_id: String,
    #[serde(rename = "error_code")]
    pub code: ErrorCode,
    pub message: String,
    pub http_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(skip)]
    pub network: Option<NetworkFailure>,
}

impl AdapterError {
    /// Create a new error with the code's default advisory status.
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            provider_id: String::new(),
            operation_id: String::new(),
            code,
            message: message.into(),
            http_status: code.default_status(),
            raw: None,
            network: None,
        }
    }

    pub fn credential<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::CredentialError, message)
    }

    pub fn provider_api<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::ProviderApiError, message)
    }

    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::InvalidParameters, message)
    }

    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::EncodingError, message)
    }

    pub fn decoding<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::DecodingError, message)
    }

    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        let field = field.into();
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("missing required field '{}'", field),
        )
    }

    pub fn operation_not_supported(operation_id: &str) -> Self {
        Self::new(
            ErrorCode::OperationNotSupported,
            format!("operation '{}' is not supported", operation_id),
        )
        .for_operation(operation_id)
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Override the advisory HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    /// Attach the raw upstream payload.
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Mark the error as a network-level failure.
    pub fn with_network(mut self, failure: NetworkFailure) -> Self {
        self.network = Some(failure);
        self
    }

    /// Set the provider id if it has not been set yet.
    pub fn for_provider(mut self, provider_id: &str) -> Self {
        if self.provider_id.is_empty() {
            self.provider_id = provider_id.to_string();
        }
        self
    }

    /// Set the operation id if it has not been set yet.
    pub fn for_operation(mut self, operation_id: &str) -> Self {
        if self.operation_id.is_empty() {
            self.operation_id = operation_id.to_string();
        }
        self
    }

    /// Fill in provider and operation ids that the producer left blank.
    pub fn scoped(self, provider_id: &str, operation_id: &str) -> Self {
        self.for_provider(provider_id).for_operation(operation_id)
    }

    /// True for failures attributable to the remote side: network errors,
    /// timeouts and 5xx responses. These are the failures that trip a circuit breaker.
    pub fn is_provider_failure(&self) -> bool {
        self.is_network_error() || self.is_timeout() || self.is_server_error()
    }

    /// Connection refused/reset/closed, unreachable host and similar.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.network,
            Some(NetworkFailure::Connect) | Some(NetworkFailure::Other)
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout || self.network == Some(NetworkFailure::Timeout)
    }

    /// A 5xx answer from the remote provider.
    pub fn is_server_error(&self) -> bool {
        self.code == ErrorCode::ProviderApiError
            && self.network.is_none()
            && (500..600).contains(&self.http_status)
    }
}

/// Truncate an upstream body to a UTF-8 safe snippet for messages and logs.
pub fn body_snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        body.to_string()
    }
}
