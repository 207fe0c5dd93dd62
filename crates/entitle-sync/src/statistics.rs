//! Run statistics tracking.
//!
//! Counters are updated by each stage as it settles and can be read while
//! the run is in flight.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Statistics of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Units listed by the directory.
    #[serde(default)]
    pub units_listed: u32,
    /// Units without an external code.
    #[serde(default)]
    pub units_skipped: u32,
    /// Units whose fetch succeeded.
    #[serde(default)]
    pub units_fetched: u32,
    /// Units whose fetch failed.
    #[serde(default)]
    pub units_failed: u32,
    /// Distinct entitlement codes observed.
    #[serde(default)]
    pub distinct_codes: u32,
    #[serde(default)]
    pub applications_ensured: u32,
    #[serde(default)]
    pub roles_ensured: u32,
    #[serde(default)]
    pub groups_linked: u32,
    /// Units whose linking stopped on a failure.
    #[serde(default)]
    pub units_link_failed: u32,
    /// Units the restricted function was granted in.
    #[serde(default)]
    pub function_units: u32,
    /// Users holding the restricted function.
    #[serde(default)]
    pub function_users: u32,
    /// Total duration in seconds.
    #[serde(default)]
    pub duration_seconds: u64,
}

impl RunStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentage of queried units whose fetch succeeded.
    #[must_use]
    pub fn fetch_success_rate(&self) -> f64 {
        let queried = self.units_fetched + self.units_failed;
        if queried == 0 {
            0.0
        } else {
            (f64::from(self.units_fetched) / f64::from(queried)) * 100.0
        }
    }
}

/// Thread-safe tracker for accumulating statistics during a run.
#[derive(Debug)]
pub struct StatisticsTracker {
    units_listed: AtomicU32,
    units_skipped: AtomicU32,
    units_fetched: AtomicU32,
    units_failed: AtomicU32,
    distinct_codes: AtomicU32,
    applications_ensured: AtomicU32,
    roles_ensured: AtomicU32,
    groups_linked: AtomicU32,
    units_link_failed: AtomicU32,
    function_units: AtomicU32,
    function_users: AtomicU32,
    start_time: Instant,
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

impl StatisticsTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            units_listed: AtomicU32::new(0),
            units_skipped: AtomicU32::new(0),
            units_fetched: AtomicU32::new(0),
            units_failed: AtomicU32::new(0),
            distinct_codes: AtomicU32::new(0),
            applications_ensured: AtomicU32::new(0),
            roles_ensured: AtomicU32::new(0),
            groups_linked: AtomicU32::new(0),
            units_link_failed: AtomicU32::new(0),
            function_units: AtomicU32::new(0),
            function_users: AtomicU32::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_listing(&self, listed: usize) {
        self.units_listed.store(saturating(listed), Ordering::SeqCst);
    }

    pub fn record_fetch(&self, fetched: usize, failed: usize, skipped: usize, distinct_codes: usize) {
        self.units_fetched.store(saturating(fetched), Ordering::SeqCst);
        self.units_failed.store(saturating(failed), Ordering::SeqCst);
        self.units_skipped.store(saturating(skipped), Ordering::SeqCst);
        self.distinct_codes
            .store(saturating(distinct_codes), Ordering::SeqCst);
    }

    pub fn record_provisioning(&self, applications: u32, roles: u32) {
        self.applications_ensured.store(applications, Ordering::SeqCst);
        self.roles_ensured.store(roles, Ordering::SeqCst);
    }

    pub fn record_linking(&self, groups_linked: u32, units_failed: usize) {
        self.groups_linked.store(groups_linked, Ordering::SeqCst);
        self.units_link_failed
            .store(saturating(units_failed), Ordering::SeqCst);
    }

    pub fn record_function(&self, units: u32, users: u32) {
        self.function_units.store(units, Ordering::SeqCst);
        self.function_users.store(users, Ordering::SeqCst);
    }

    /// Get elapsed duration in seconds.
    pub fn elapsed_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot current statistics.
    pub fn snapshot(&self) -> RunStatistics {
        RunStatistics {
            units_listed: self.units_listed.load(Ordering::SeqCst),
            units_skipped: self.units_skipped.load(Ordering::SeqCst),
            units_fetched: self.units_fetched.load(Ordering::SeqCst),
            units_failed: self.units_failed.load(Ordering::SeqCst),
            distinct_codes: self.distinct_codes.load(Ordering::SeqCst),
            applications_ensured: self.applications_ensured.load(Ordering::SeqCst),
            roles_ensured: self.roles_ensured.load(Ordering::SeqCst),
            groups_linked: self.groups_linked.load(Ordering::SeqCst),
            units_link_failed: self.units_link_failed.load(Ordering::SeqCst),
            function_units: self.function_units.load(Ordering::SeqCst),
            function_users: self.function_users.load(Ordering::SeqCst),
            duration_seconds: self.elapsed_seconds(),
        }
    }
}
