//! Entitlement client implementation.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use entitle_core::{EntitlementRecord, OrganizationalUnit, UnitId};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::payload::parse_entitlements;

/// Maximum number of body bytes kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Source of per-unit entitlement records.
#[async_trait]
pub trait EntitlementFetcher: Send + Sync {
    /// Fetch the entitlements of a single unit.
    async fn fetch(&self, unit: &OrganizationalUnit) -> ClientResult<EntitlementRecord>;
}

/// HTTP client for the entitlement web service.
pub struct EntitlementClient {
    config: ClientConfig,
    client: Client,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for EntitlementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementClient")
            .field("base_url", &self.config.base_url)
            .field("max_concurrent", &self.config.max_concurrent)
            .finish()
    }
}

impl EntitlementClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;

        let client = Self::build_client(&config)?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent));

        Ok(Self {
            config,
            client,
            permits,
        })
    }

    /// Build the reqwest client with configuration.
    fn build_client(config: &ClientConfig) -> ClientResult<Client> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.max_concurrent);

        if !config.verify_certificate {
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder
            .build()
            .map_err(|e| ClientError::invalid_configuration(format!("failed to build HTTP client: {e}")))
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of request slots currently free.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn request(&self, external_code: &str) -> ClientResult<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ClientError::Internal {
                message: format!("request semaphore closed: {e}"),
            })?;

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("appli", self.config.appli_code.as_str()),
                ("rne", external_code),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            let mut snippet = body;
            if snippet.len() > ERROR_BODY_LIMIT {
                let mut end = ERROR_BODY_LIMIT;
                while !snippet.is_char_boundary(end) {
                    end -= 1;
                }
                snippet.truncate(end);
            }
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: snippet,
            });
        }

        Ok(body)
    }

    fn map_send_error(&self, error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            ClientError::Timeout {
                timeout_secs: self.config.request_timeout_secs,
            }
        } else {
            ClientError::transport(error)
        }
    }
}

#[async_trait]
impl EntitlementFetcher for EntitlementClient {
    #[instrument(skip(self, unit), fields(unit_id = %unit.id))]
    async fn fetch(&self, unit: &OrganizationalUnit) -> ClientResult<EntitlementRecord> {
        let external_code = unit
            .lookup_code()
            .ok_or_else(|| ClientError::MissingExternalCode {
                unit_id: unit.id.to_string(),
            })?;

        let body = self.request(external_code).await?;
        let applications = parse_entitlements(&body)?;

        debug!(
            external_code = %external_code,
            applications = ?applications.iter().map(|a| a.code.as_str()).collect::<Vec<_>>(),
            "Fetched unit entitlements"
        );

        Ok(EntitlementRecord::new(external_code, applications))
    }
}

/// A unit whose fetch failed during a run.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    /// Unit identifier.
    pub unit_id: UnitId,
    /// External code the fetch was issued with.
    pub external_code: String,
    /// Error code from [`ClientError::error_code`].
    pub error_code: &'static str,
    /// Human-readable error.
    pub message: String,
}

/// Result of fetching the entitlements of every unit of a run.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Records of the units whose fetch succeeded.
    pub records: HashMap<UnitId, EntitlementRecord>,
    /// External codes of the units whose fetch succeeded.
    pub active: BTreeSet<String>,
    /// Units whose fetch failed.
    pub failed: Vec<FetchFailure>,
    /// Units skipped because they carry no external code.
    pub skipped: Vec<UnitId>,
}

/// Fetch every unit concurrently and wait for all of them to settle.
///
/// Failures are logged and collected; they never abort the fan-out.
pub async fn fetch_all<F>(fetcher: &F, units: &[OrganizationalUnit]) -> FetchOutcome
where
    F: EntitlementFetcher + ?Sized,
{
    let mut outcome = FetchOutcome::default();
    let mut queried = Vec::with_capacity(units.len());

    for unit in units {
        match unit.lookup_code() {
            Some(code) => queried.push((unit, code)),
            None => {
                debug!(unit_id = %unit.id, "Skipping unit without external code");
                outcome.skipped.push(unit.id.clone());
            }
        }
    }

    let results = join_all(
        queried
            .iter()
            .map(|(unit, _)| async move { fetcher.fetch(unit).await }),
    )
    .await;

    for ((unit, code), result) in queried.into_iter().zip(results) {
        match result {
            Ok(record) => {
                outcome.active.insert(record.external_code.clone());
                outcome.records.insert(unit.id.clone(), record);
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        unit_id = %unit.id,
                        external_code = %code,
                        error = %e,
                        "Transient failure fetching unit entitlements"
                    );
                } else {
                    error!(
                        unit_id = %unit.id,
                        external_code = %code,
                        error = %e,
                        "Failed to fetch unit entitlements"
                    );
                }
                outcome.failed.push(FetchFailure {
                    unit_id: unit.id.clone(),
                    external_code: code.to_string(),
                    error_code: e.error_code(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        fetched = outcome.records.len(),
        failed = outcome.failed.len(),
        skipped = outcome.skipped.len(),
        "Entitlement fetch settled"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitle_core::ApplicationEntitlement;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntitlementFetcher for StaticFetcher {
        async fn fetch(&self, unit: &OrganizationalUnit) -> ClientResult<EntitlementRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match unit.lookup_code() {
                Some("BROKEN") => Err(ClientError::Http {
                    status: 500,
                    body: "boom".to_string(),
                }),
                Some(code) => Ok(EntitlementRecord::new(
                    code,
                    vec![ApplicationEntitlement::new("AGENDA")],
                )),
                None => Err(ClientError::MissingExternalCode {
                    unit_id: unit.id.to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_client_new_validates_config() {
        let result = EntitlementClient::new(ClientConfig::new("nope", "ENT"));
        assert!(result.is_err());
    }

    #[test]
    fn test_client_permits_match_config() {
        let client = EntitlementClient::new(
            ClientConfig::new("http://localhost:9000/ws", "ENT").with_max_concurrent(4),
        )
        .unwrap();
        assert_eq!(client.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_fetch_all_partitions_results() {
        let fetcher = StaticFetcher {
            calls: AtomicUsize::new(0),
        };
        let units = vec![
            OrganizationalUnit::new("u1", "0123456A"),
            OrganizationalUnit::new("u2", "BROKEN"),
            OrganizationalUnit::without_code("u3"),
        ];

        let outcome = fetch_all(&fetcher, &units).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records.contains_key(&UnitId::from("u1")));
        assert!(outcome.active.contains("0123456A"));
        assert!(!outcome.active.contains("BROKEN"));
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].unit_id, UnitId::from("u2"));
        assert_eq!(outcome.failed[0].error_code, "HTTP_ERROR");
        assert_eq!(outcome.skipped, vec![UnitId::from("u3")]);
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let fetcher = StaticFetcher {
            calls: AtomicUsize::new(0),
        };
        let outcome = fetch_all(&fetcher, &[]).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.failed.is_empty());
    }
}
