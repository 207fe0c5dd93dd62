//! Entitlement client error types
//!
//! Error definitions with transient/permanent classification.

use thiserror::Error;

/// Error that can occur while fetching a unit's entitlements.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The unit has no external code to query with.
    #[error("unit {unit_id} has no external code")]
    MissingExternalCode { unit_id: String },

    /// The remote service replied with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request did not complete in time.
    #[error("request timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Transport-level failure (DNS, TCP, TLS, ...).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The reply body is not a well-formed entitlement list.
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    /// Check if this error is transient.
    ///
    /// Nothing is retried within a run; the classification only feeds logs
    /// and statistics.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout { .. } | ClientError::Transport { .. } => true,
            ClientError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ClientError::MissingExternalCode { .. } => "MISSING_EXTERNAL_CODE",
            ClientError::Http { .. } => "HTTP_ERROR",
            ClientError::Timeout { .. } => "TIMEOUT",
            ClientError::Transport { .. } => "TRANSPORT_ERROR",
            ClientError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            ClientError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ClientError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a malformed payload error.
    pub fn malformed(message: impl Into<String>) -> Self {
        ClientError::MalformedPayload {
            message: message.into(),
        }
    }

    /// Create a transport error with source.
    pub fn transport(source: reqwest::Error) -> Self {
        ClientError::Transport {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
