//! Daily resync schedule.
//!
//! Nodes of a cluster are staggered: a node whose name carries an even
//! number runs its startup resync two minutes late and its daily resync five
//! minutes after the others.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default daily sync time.
pub const DEFAULT_SYNC_TIME: (u32, u32) = (23, 45);

/// Daily sync time of staggered cluster nodes.
pub const STAGGERED_SYNC_TIME: (u32, u32) = (23, 50);

/// Startup delay of staggered cluster nodes, in seconds.
pub const STAGGERED_STARTUP_DELAY_SECS: u64 = 120;

/// When the resync runs on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Time of day (UTC) of the daily resync.
    pub sync_time: NaiveTime,
    /// Delay before the startup resync, in seconds.
    pub startup_delay_secs: u64,
}

fn time_of(hm: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hm.0, hm.1, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_time: time_of(DEFAULT_SYNC_TIME),
            startup_delay_secs: 0,
        }
    }
}

impl ScheduleConfig {
    /// Schedule of a node, staggered when it is an even cluster node.
    ///
    /// An explicit `sync_time` overrides the default time but not the
    /// startup delay.
    #[must_use]
    pub fn for_node(cluster: bool, node: Option<&str>, sync_time: Option<NaiveTime>) -> Self {
        let staggered = cluster && node.is_some_and(is_even_node);
        let default_time = if staggered {
            time_of(STAGGERED_SYNC_TIME)
        } else {
            time_of(DEFAULT_SYNC_TIME)
        };

        Self {
            sync_time: sync_time.unwrap_or(default_time),
            startup_delay_secs: if staggered {
                STAGGERED_STARTUP_DELAY_SECS
            } else {
                0
            },
        }
    }

    /// Next run strictly after `from`.
    #[must_use]
    pub fn next_run(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        next_daily(from, self.sync_time)
    }
}

/// Whether the numeric part of a node name is even.
///
/// Letters are stripped before parsing; a name without a valid number is
/// never staggered.
#[must_use]
pub fn is_even_node(node: &str) -> bool {
    let digits: String = node
        .trim()
        .chars()
        .filter(|c| !c.is_ascii_alphabetic())
        .collect();
    digits.parse::<i64>().is_ok_and(|n| n % 2 == 0)
}

/// Parse a `HH:MM` time of day.
pub fn parse_sync_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| format!("Invalid sync time '{value}': {e}"))
}

fn next_daily(from: DateTime<Utc>, target_time: NaiveTime) -> DateTime<Utc> {
    let today_target = from.date_naive().and_time(target_time).and_utc();

    if from < today_target {
        today_target
    } else {
        let tomorrow = from.date_naive() + Duration::days(1);
        tomorrow.and_time(target_time).and_utc()
    }
}
