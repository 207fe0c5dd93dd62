//! Collaborator error types.

use thiserror::Error;

/// Error returned by the registry bus and the unit directory.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Bus configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The object already exists in the registry.
    #[error("already exists: {message}")]
    AlreadyExists { message: String },

    /// The bus handler replied with an error status.
    #[error("{action} rejected: {message}")]
    Rejected { action: String, message: String },

    /// The bus endpoint replied with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request did not complete in time.
    #[error("request timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Transport-level failure.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The reply could not be interpreted.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl RegistryError {
    /// Check if this error is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Timeout { .. } | RegistryError::Transport { .. } => true,
            RegistryError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the error reports an object that already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RegistryError::AlreadyExists { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            RegistryError::AlreadyExists { .. } => "ALREADY_EXISTS",
            RegistryError::Rejected { .. } => "REJECTED",
            RegistryError::Http { .. } => "HTTP_ERROR",
            RegistryError::Timeout { .. } => "TIMEOUT",
            RegistryError::Transport { .. } => "TRANSPORT_ERROR",
            RegistryError::InvalidResponse { .. } => "INVALID_RESPONSE",
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        RegistryError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        RegistryError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a transport error with source.
    pub fn transport(source: reqwest::Error) -> Self {
        RegistryError::Transport {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error returned by the permission graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A statement failed; the server rolled the transaction back.
    #[error("statement failed ({code}): {message}")]
    Statement { code: String, message: String },

    /// The endpoint replied with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request did not complete in time.
    #[error("request timeout after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Transport-level failure.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The reply could not be interpreted.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl GraphError {
    /// Check if this error is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            GraphError::Timeout { .. } | GraphError::Transport { .. } => true,
            GraphError::Http { status, .. } => *status == 429 || *status >= 500,
            GraphError::Statement { code, .. } => code.contains("TransientError"),
            _ => false,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            GraphError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            GraphError::Statement { .. } => "STATEMENT_FAILED",
            GraphError::Http { .. } => "HTTP_ERROR",
            GraphError::Timeout { .. } => "TIMEOUT",
            GraphError::Transport { .. } => "TRANSPORT_ERROR",
            GraphError::InvalidResponse { .. } => "INVALID_RESPONSE",
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        GraphError::InvalidResponse {
            message: message.into(),
        }
    }

    /// Create a transport error with source.
    pub fn transport(source: reqwest::Error) -> Self {
        GraphError::Transport {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
