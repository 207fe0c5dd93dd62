//! Entitlement client configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration for the entitlement web service client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Full URL of the entitlement endpoint, without query string.
    pub base_url: String,
    /// Application code sent as the `appli` query parameter.
    pub appli_code: String,
    /// Maximum number of concurrent outbound requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whether to verify the server certificate.
    #[serde(default = "default_verify_certificate")]
    pub verify_certificate: bool,
}

fn default_max_concurrent() -> usize {
    16
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_verify_certificate() -> bool {
    true
}

impl ClientConfig {
    /// Create a configuration with default limits.
    pub fn new(base_url: impl Into<String>, appli_code: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            appli_code: appli_code.into(),
            max_concurrent: default_max_concurrent(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            verify_certificate: default_verify_certificate(),
        }
    }

    /// Set the maximum number of concurrent requests.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Disable certificate verification (test environments only).
    #[must_use]
    pub fn with_insecure_tls(mut self) -> Self {
        self.verify_certificate = false;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            ClientError::invalid_configuration(format!("invalid base_url '{}': {e}", self.base_url))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::invalid_configuration(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        if url.query().is_some() {
            return Err(ClientError::invalid_configuration(
                "base_url must not carry a query string",
            ));
        }

        if self.appli_code.trim().is_empty() {
            return Err(ClientError::invalid_configuration(
                "appli_code must not be empty",
            ));
        }

        if self.max_concurrent == 0 {
            return Err(ClientError::invalid_configuration(
                "max_concurrent must be greater than zero",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ClientError::invalid_configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }

        Ok(())
    }
}
