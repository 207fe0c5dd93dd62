//! Permission graph store.
//!
//! Statements are submitted to the graph's transactional commit endpoint:
//! one request opens, runs and commits a transaction. When any statement
//! fails the server rolls the whole transaction back and lists the failure
//! in `errors`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{GraphError, GraphResult};

/// A parameterized graph query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub statement: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Statement {
    /// Create a statement without parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Map::new(),
        }
    }

    /// Bind a parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Rows as objects keyed by column name.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Transactional access to the permission graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run statements in a single transaction. All or nothing.
    async fn execute_transaction(&self, statements: &[Statement]) -> GraphResult<Vec<QueryResult>>;

    /// Run one statement in its own transaction.
    async fn execute(&self, statement: Statement) -> GraphResult<QueryResult> {
        let mut results = self.execute_transaction(std::slice::from_ref(&statement)).await?;
        if results.is_empty() {
            return Err(GraphError::invalid_response("no result for statement"));
        }
        Ok(results.swap_remove(0))
    }
}

/// Configuration of the graph HTTP client.
#[derive(Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Transactional commit endpoint, e.g. `http://neo4j:7474/db/neo4j/tx/commit`.
    pub commit_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl std::fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConfig")
            .field("commit_url", &self.commit_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl GraphConfig {
    pub fn new(commit_url: impl Into<String>) -> Self {
        Self {
            commit_url: commit_url.into(),
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Use basic authentication.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GraphResult<()> {
        let url = url::Url::parse(&self.commit_url).map_err(|e| GraphError::InvalidConfiguration {
            message: format!("invalid commit url '{}': {e}", self.commit_url),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(GraphError::InvalidConfiguration {
                message: format!("unsupported scheme: {}", url.scheme()),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(GraphError::InvalidConfiguration {
                message: "request_timeout_secs must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<RawResult>,
    #[serde(default)]
    errors: Vec<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`GraphStore`] backed by the graph's HTTP transactional endpoint.
#[derive(Debug, Clone)]
pub struct HttpGraphStore {
    config: GraphConfig,
    client: Client,
}

impl HttpGraphStore {
    pub fn new(config: GraphConfig) -> GraphResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| GraphError::InvalidConfiguration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, client })
    }

    fn map_send_error(&self, error: reqwest::Error) -> GraphError {
        if error.is_timeout() {
            GraphError::Timeout {
                timeout_secs: self.config.request_timeout_secs,
            }
        } else {
            GraphError::transport(error)
        }
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    #[instrument(skip(self, statements), fields(statements = statements.len()))]
    async fn execute_transaction(&self, statements: &[Statement]) -> GraphResult<Vec<QueryResult>> {
        let mut request = self
            .client
            .post(&self.config.commit_url)
            .json(&CommitRequest { statements });

        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Graph transaction request failed");
            return Err(GraphError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| GraphError::invalid_response(e.to_string()))?;

        if let Some(error) = body.errors.into_iter().next() {
            warn!(code = %error.code, message = %error.message, "Graph transaction rolled back");
            return Err(GraphError::Statement {
                code: error.code,
                message: error.message,
            });
        }

        debug!(results = body.results.len(), "Graph transaction committed");

        Ok(body
            .results
            .into_iter()
            .map(|r| QueryResult {
                columns: r.columns,
                rows: r.data.into_iter().map(|d| d.row).collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_params() {
        let s = Statement::new("MATCH (s:Structure {id: $id}) RETURN s")
            .param("id", "s1")
            .param("codes", json!(["A", "B"]));
        let value = serde_json::to_value(&s).unwrap();
        assert_eq!(value["parameters"]["id"], "s1");
        assert_eq!(value["parameters"]["codes"][1], "B");
    }

    #[test]
    fn test_query_result_records() {
        let result = QueryResult {
            columns: vec!["structureId".into(), "users".into()],
            rows: vec![vec![json!("s1"), json!(["u1", "u2"])]],
        };
        let records = result.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["structureId"], "s1");
        assert_eq!(records[0]["users"][1], "u2");
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config = GraphConfig::new("http://localhost:7474/db/neo4j/tx/commit")
            .with_basic_auth("neo4j", "secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(GraphConfig::new("not a url").validate().is_err());
        assert!(GraphConfig::new("http://localhost:7474/tx/commit")
            .with_request_timeout(0)
            .validate()
            .is_err());
    }
}
