//! Export-event trigger policy.
//!
//! An `exported` event of the configured export format schedules a delayed
//! resync. When the delay elapses, the weekday policy decides whether the
//! resync actually runs.

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::orchestrator::{Orchestrator, TriggerSource};

/// Action of the export-completed event.
pub const EXPORTED_ACTION: &str = "exported";

/// Error message replied to unknown actions.
pub const INVALID_ACTION: &str = "invalid.action";

/// Configuration of the export trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Export format that triggers a resync.
    #[serde(default = "default_export_format")]
    pub export_format: String,
    /// Delay between the event and the resync, in seconds.
    #[serde(default = "default_exported_delay_secs")]
    pub exported_delay_secs: u64,
    /// Only run the delayed resync on this day; `None` runs every day.
    #[serde(default = "default_run_only_on")]
    pub run_only_on: Option<Weekday>,
}

fn default_export_format() -> String {
    "ELIOT".to_string()
}

fn default_exported_delay_secs() -> u64 {
    300
}

fn default_run_only_on() -> Option<Weekday> {
    Some(Weekday::Sun)
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            export_format: default_export_format(),
            exported_delay_secs: default_exported_delay_secs(),
            run_only_on: default_run_only_on(),
        }
    }
}

/// Inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_format: Option<String>,
}

impl TriggerEvent {
    pub fn exported(format: impl Into<String>) -> Self {
        Self {
            action: EXPORTED_ACTION.to_string(),
            export_format: Some(format.into()),
        }
    }
}

/// What to do with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Schedule a resync after the delay.
    Schedule(Duration),
    /// Acknowledge without scheduling anything.
    Ignore,
    /// Unknown action.
    Invalid,
}

/// Decides how inbound events and elapsed delays are handled.
#[derive(Debug, Clone, Default)]
pub struct TriggerPolicy {
    config: TriggerConfig,
}

impl TriggerPolicy {
    #[must_use]
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Classify an inbound event.
    #[must_use]
    pub fn decide(&self, event: &TriggerEvent) -> TriggerDecision {
        if event.action != EXPORTED_ACTION {
            return TriggerDecision::Invalid;
        }
        if event.export_format.as_deref() == Some(self.config.export_format.as_str()) {
            TriggerDecision::Schedule(Duration::from_secs(self.config.exported_delay_secs))
        } else {
            TriggerDecision::Ignore
        }
    }

    /// Whether a delayed resync may run at `now`.
    #[must_use]
    pub fn allows_day(&self, now: DateTime<Utc>) -> bool {
        self.config
            .run_only_on
            .map_or(true, |day| now.weekday() == day)
    }
}

/// Parse a weekday policy: a weekday name, or `any` to run every day.
pub fn parse_run_only_on(value: &str) -> Result<Option<Weekday>, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("any") {
        return Ok(None);
    }
    value
        .parse::<Weekday>()
        .map(Some)
        .map_err(|_| format!("Invalid weekday: {value}"))
}

/// Run a resync after `delay` if the weekday policy allows it.
pub fn schedule_delayed_resync(
    orchestrator: Arc<Orchestrator>,
    policy: TriggerPolicy,
    delay: Duration,
) -> JoinHandle<()> {
    info!(delay_secs = delay.as_secs(), "Delayed resync scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        if !policy.allows_day(Utc::now()) {
            info!(
                run_only_on = ?policy.config().run_only_on,
                "Delayed resync skipped by weekday policy"
            );
            return;
        }

        if let Err(e) = orchestrator.resync(TriggerSource::Exported).await {
            warn!(error = %e, code = e.error_code(), "Delayed resync failed");
        }
    })
}
