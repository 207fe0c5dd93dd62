//! JSON message bus transport.
//!
//! Every request is a `POST <base_url>/<address>` carrying an `action` field;
//! every reply is an envelope `{status, message?, result?}`.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};

/// Reply status of a successful bus call.
pub const STATUS_OK: &str = "ok";

/// Markers identifying a duplicate-object error message.
const DUPLICATE_MARKERS: &[&str] = &["already exists", "duplicate", "constraint"];

/// Configuration of the bus transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Base URL of the bus gateway.
    pub base_url: String,
    /// Address of the application registry handler.
    #[serde(default = "default_registry_address")]
    pub registry_address: String,
    /// Address of the directory handler.
    #[serde(default = "default_directory_address")]
    pub directory_address: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_registry_address() -> String {
    "wse.app.registry.bus".to_string()
}

fn default_directory_address() -> String {
    "directory".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl BusConfig {
    /// Create a configuration with default addresses.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            registry_address: default_registry_address(),
            directory_address: default_directory_address(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Set the registry handler address.
    #[must_use]
    pub fn with_registry_address(mut self, address: impl Into<String>) -> Self {
        self.registry_address = address.into();
        self
    }

    /// Set the directory handler address.
    #[must_use]
    pub fn with_directory_address(mut self, address: impl Into<String>) -> Self {
        self.directory_address = address.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RegistryResult<()> {
        let url = url::Url::parse(&self.base_url).map_err(|e| {
            RegistryError::invalid_configuration(format!("invalid bus url '{}': {e}", self.base_url))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RegistryError::invalid_configuration(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        if self.registry_address.trim().is_empty() || self.directory_address.trim().is_empty() {
            return Err(RegistryError::invalid_configuration(
                "bus addresses must not be empty",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(RegistryError::invalid_configuration(
                "request_timeout_secs must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Reply envelope of a bus call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl BusReply {
    /// Whether the handler reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Convert the envelope into the `result` payload or an error.
    pub fn into_result(self, action: &str) -> RegistryResult<Option<Value>> {
        if self.is_ok() {
            return Ok(self.result);
        }

        let message = self
            .message
            .unwrap_or_else(|| format!("status '{}'", self.status));
        if is_duplicate_message(&message) {
            Err(RegistryError::AlreadyExists { message })
        } else {
            Err(RegistryError::Rejected {
                action: action.to_string(),
                message,
            })
        }
    }

    /// Convert the envelope into its `result` array.
    ///
    /// A success reply without an array `result` is an invalid response.
    pub fn into_array(self, action: &str) -> RegistryResult<Vec<Value>> {
        match self.into_result(action)? {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(RegistryError::invalid_response(format!(
                "{action}: expected array result, got {other}"
            ))),
            None => Err(RegistryError::invalid_response(format!(
                "{action}: missing result"
            ))),
        }
    }
}

fn is_duplicate_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    DUPLICATE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// HTTP client for the message bus.
#[derive(Debug, Clone)]
pub struct HttpBus {
    config: BusConfig,
    client: Client,
}

impl HttpBus {
    /// Create a new bus client.
    pub fn new(config: BusConfig) -> RegistryResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                RegistryError::invalid_configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn address_url(&self, address: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), address)
    }

    /// Send a request to a bus address and decode the reply envelope.
    pub async fn send(&self, address: &str, body: &Value) -> RegistryResult<BusReply> {
        let action = body
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        debug!(address = %address, action = %action, "Sending bus request");

        let response = self
            .client
            .post(self.address_url(address))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();

        if status == StatusCode::CONFLICT {
            let message = response.text().await.unwrap_or_default();
            return Err(RegistryError::AlreadyExists { message });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                address = %address,
                action = %action,
                status = status.as_u16(),
                "Bus request failed"
            );
            return Err(RegistryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<BusReply>()
            .await
            .map_err(|e| RegistryError::invalid_response(format!("{action}: {e}")))
    }

    /// Send a request to the registry handler.
    pub async fn send_registry(&self, body: &Value) -> RegistryResult<BusReply> {
        self.send(&self.config.registry_address, body).await
    }

    /// Send a request to the directory handler.
    pub async fn send_directory(&self, body: &Value) -> RegistryResult<BusReply> {
        self.send(&self.config.directory_address, body).await
    }

    fn map_send_error(&self, error: reqwest::Error) -> RegistryError {
        if error.is_timeout() {
            RegistryError::Timeout {
                timeout_secs: self.config.request_timeout_secs,
            }
        } else {
            RegistryError::transport(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(value: Value) -> BusReply {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = BusConfig::new("http://localhost:8090/bus");
        assert_eq!(config.registry_address, "wse.app.registry.bus");
        assert_eq!(config.directory_address, "directory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(BusConfig::new("bus").validate().is_err());
        assert!(BusConfig::new("http://localhost/bus")
            .with_registry_address(" ")
            .validate()
            .is_err());
        assert!(BusConfig::new("http://localhost/bus")
            .with_request_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_ok_reply_yields_result() {
        let r = reply(json!({"status": "ok", "result": {"id": "r1"}}));
        assert!(r.is_ok());
        assert_eq!(
            r.into_result("create-role").unwrap(),
            Some(json!({"id": "r1"}))
        );
    }

    #[test]
    fn test_duplicate_reply_maps_to_already_exists() {
        let r = reply(json!({"status": "error", "message": "Node already exists with label"}));
        assert!(r.into_result("create-role").unwrap_err().is_already_exists());

        let r = reply(json!({"status": "error", "message": "ConstraintValidationFailed"}));
        assert!(r.into_result("create-role").unwrap_err().is_already_exists());
    }

    #[test]
    fn test_error_reply_maps_to_rejected() {
        let r = reply(json!({"status": "error", "message": "invalid.action"}));
        match r.into_result("link-role-group").unwrap_err() {
            RegistryError::Rejected { action, message } => {
                assert_eq!(action, "link-role-group");
                assert_eq!(message, "invalid.action");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_into_array_requires_array() {
        let r = reply(json!({"status": "ok", "result": [{"id": "1"}]}));
        assert_eq!(r.into_array("list-roles").unwrap().len(), 1);

        let r = reply(json!({"status": "ok"}));
        assert!(matches!(
            r.into_array("list-roles"),
            Err(RegistryError::InvalidResponse { .. })
        ));

        let r = reply(json!({"status": "ok", "result": {"id": "1"}}));
        assert!(r.into_array("list-roles").is_err());
    }
}
