//! Daemon configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing required variable or an unparsable value
//! stops the process before anything connects.

use chrono::{NaiveTime, Weekday};
use std::env;
use std::str::FromStr;
use thiserror::Error;

use entitle_client::ClientConfig;
use entitle_registry::{BusConfig, GraphConfig};
use entitle_sync::schedule::{parse_sync_time, ScheduleConfig};
use entitle_sync::trigger::parse_run_only_on;
use entitle_sync::{SyncConfig, TriggerConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log filter directive, overridden by `RUST_LOG`.
    pub rust_log: String,
    pub host: String,
    pub port: u16,
    /// Postgres URL of the replicated store; the in-process store is used
    /// when unset.
    pub database_url: Option<String>,
    pub client: ClientConfig,
    pub bus: BusConfig,
    pub graph: GraphConfig,
    pub sync: SyncConfig,
    pub trigger: TriggerConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Required Variables
    ///
    /// - `ENTITLEMENT_URL` - entitlement web service endpoint
    /// - `APPLI_CODE` - application code sent with every fetch
    /// - `BUS_URL` - base URL of the message bus
    /// - `GRAPH_URL` - transactional commit endpoint of the graph store
    ///
    /// # Optional Variables
    ///
    /// - `RUST_LOG` (default: "info"), `HOST` (default: "0.0.0.0"), `PORT` (default: 8080)
    /// - `DATABASE_URL` - replicated store backend
    /// - `GRAPH_USERNAME`, `GRAPH_PASSWORD`
    /// - `REGISTRY_ADDRESS`, `DIRECTORY_ADDRESS`
    /// - `MAX_CONCURRENT_FETCHES` (default: 16), `FETCH_TIMEOUT_SECS` (default: 30)
    /// - `VERIFY_CERTIFICATE` (default: true)
    /// - `STAGE_TIMEOUT_SECS` (default: 600), `PROVISION_ON_SCHEDULE` (default: true)
    /// - `MAX_CONCURRENT_LINKS` (default: 8)
    /// - `EXPORT_FORMAT` (default: "ELIOT"), `EXPORTED_DELAY_SECS` (default: 300)
    /// - `RUN_ONLY_ON` - weekday gating delayed resyncs, or `any` (default: "Sunday")
    /// - `SYNC_TIME` - `HH:MM` UTC time of the daily resync
    /// - `CLUSTER`, `NODE_NAME` - node staggering
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development only)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let rust_log = vars.get("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let host = vars.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = vars.parse("PORT")?.unwrap_or(8080);
        if port == 0 {
            return Err(ConfigError::invalid("PORT", "must be between 1 and 65535"));
        }

        let mut client = ClientConfig::new(
            vars.required("ENTITLEMENT_URL")?,
            vars.required("APPLI_CODE")?,
        );
        if let Some(max) = vars.parse("MAX_CONCURRENT_FETCHES")? {
            client = client.with_max_concurrent(max);
        }
        if let Some(secs) = vars.parse("FETCH_TIMEOUT_SECS")? {
            client = client.with_request_timeout(secs);
        }
        if let Some(verify) = vars.flag("VERIFY_CERTIFICATE")? {
            client.verify_certificate = verify;
        }
        client
            .validate()
            .map_err(|e| ConfigError::invalid("ENTITLEMENT_URL", e.to_string()))?;

        let mut bus = BusConfig::new(vars.required("BUS_URL")?);
        if let Some(address) = vars.get("REGISTRY_ADDRESS") {
            bus = bus.with_registry_address(address);
        }
        if let Some(address) = vars.get("DIRECTORY_ADDRESS") {
            bus = bus.with_directory_address(address);
        }
        bus.validate()
            .map_err(|e| ConfigError::invalid("BUS_URL", e.to_string()))?;

        let mut graph = GraphConfig::new(vars.required("GRAPH_URL")?);
        if let Some(username) = vars.get("GRAPH_USERNAME") {
            let password = vars.get("GRAPH_PASSWORD").unwrap_or_default();
            graph = graph.with_basic_auth(username, password);
        }
        graph
            .validate()
            .map_err(|e| ConfigError::invalid("GRAPH_URL", e.to_string()))?;

        let mut sync = SyncConfig::default();
        if let Some(secs) = vars.parse("STAGE_TIMEOUT_SECS")? {
            sync = sync.with_stage_timeout(secs);
        }
        if let Some(provision) = vars.flag("PROVISION_ON_SCHEDULE")? {
            sync.provision_on_schedule = provision;
        }
        if let Some(max) = vars.parse::<usize>("MAX_CONCURRENT_LINKS")? {
            if max == 0 {
                return Err(ConfigError::invalid(
                    "MAX_CONCURRENT_LINKS",
                    "must be greater than zero",
                ));
            }
            sync.link.max_concurrent = max;
        }
        sync.validate()
            .map_err(|message| ConfigError::invalid("STAGE_TIMEOUT_SECS", message))?;

        let mut trigger = TriggerConfig::default();
        if let Some(format) = vars.get("EXPORT_FORMAT") {
            trigger.export_format = format;
        }
        if let Some(secs) = vars.parse("EXPORTED_DELAY_SECS")? {
            trigger.exported_delay_secs = secs;
        }
        if let Some(day) = vars.get("RUN_ONLY_ON") {
            trigger.run_only_on = parse_weekday(&day)?;
        }

        let sync_time = vars
            .get("SYNC_TIME")
            .map(|value| parse_sync_time(&value).map_err(|e| ConfigError::invalid("SYNC_TIME", e)))
            .transpose()?;
        let cluster = vars.flag("CLUSTER")?.unwrap_or(false);
        let node_name = vars.get("NODE_NAME");
        let schedule = ScheduleConfig::for_node(cluster, node_name.as_deref(), sync_time);

        Ok(Self {
            rust_log,
            host,
            port,
            database_url: vars.get("DATABASE_URL"),
            client,
            bus,
            graph,
            sync,
            trigger,
            schedule,
        })
    }

    /// Get the server bind address as a socket address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time of the daily resync.
    pub fn sync_time(&self) -> NaiveTime {
        self.schedule.sync_time
    }
}

fn parse_weekday(value: &str) -> Result<Option<Weekday>, ConfigError> {
    parse_run_only_on(value).map_err(|message| ConfigError::invalid("RUN_ONLY_ON", message))
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of a variable.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|e| ConfigError::invalid(name, e.to_string()))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        self.get(name)
            .map(|value| match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(ConfigError::invalid(name, format!("not a boolean: {other}"))),
            })
            .transpose()
    }
}
