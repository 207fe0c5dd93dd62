//! Reconciliation orchestrator.
//!
//! Drives one run through its stages: list units, fetch entitlements and
//! swap the store, provision applications and roles, link roles to groups,
//! bootstrap the restricted function. Every stage settles fully before the
//! next starts and is bounded by the stage timeout. Only one run is in
//! flight at a time; overlapping requests are rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};

use entitle_client::{fetch_all, EntitlementFetcher, FetchOutcome};
use entitle_core::{RunId, UnitId};
use entitle_registry::{GraphStore, Registry, UnitDirectory};

use crate::active_units::{persist_active_units, DEFAULT_EXPORT_TAG};
use crate::bootstrap::{bootstrap_function, FunctionConfig};
use crate::error::{SyncError, SyncResult};
use crate::linker::{link_units, LinkConfig, LinkFailure};
use crate::phase::RunPhase;
use crate::provisioner::{provision, ProvisionConfig};
use crate::statistics::{RunStatistics, StatisticsTracker};
use crate::store::EntitlementStore;

/// Configuration of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Time budget of each stage, in seconds.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Export tag written on active units.
    #[serde(default = "default_export_tag")]
    pub export_tag: String,
    /// Whether startup and scheduled runs provision the registry or only
    /// refresh the store.
    #[serde(default = "default_provision_on_schedule")]
    pub provision_on_schedule: bool,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub function: FunctionConfig,
}

fn default_stage_timeout_secs() -> u64 {
    600
}

fn default_export_tag() -> String {
    DEFAULT_EXPORT_TAG.to_string()
}

fn default_provision_on_schedule() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout_secs(),
            export_tag: default_export_tag(),
            provision_on_schedule: default_provision_on_schedule(),
            provision: ProvisionConfig::default(),
            link: LinkConfig::default(),
            function: FunctionConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Set the stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = secs;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.stage_timeout_secs == 0 {
            return Err("stage_timeout_secs must be greater than zero".to_string());
        }
        if self.export_tag.trim().is_empty() {
            return Err("export_tag must not be empty".to_string());
        }
        if self.link.restricted_marker.is_empty() {
            return Err("restricted_marker must not be empty".to_string());
        }
        if self.link.max_concurrent == 0 {
            return Err("link max_concurrent must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Process startup.
    Startup,
    /// Daily schedule.
    Scheduled,
    /// Export-completed event.
    Exported,
    /// Operator request.
    Manual,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Exported => write!(f, "exported"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Extent of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every stage.
    Full,
    /// Fetch, store swap and active units only.
    StoreOnly,
}

/// A unit whose fetch failed during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFailureReport {
    pub unit_id: UnitId,
    pub external_code: String,
    pub error_code: String,
    pub message: String,
}

/// Report of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub trigger: TriggerSource,
    pub mode: RunMode,
    /// Final phase: `completed` or `aborted`.
    pub phase: RunPhase,
    /// Phase the run was in when it aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<RunPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub statistics: RunStatistics,
    #[serde(default)]
    pub fetch_failures: Vec<FetchFailureReport>,
    #[serde(default)]
    pub link_failures: Vec<LinkFailure>,
    /// Whether the active units were written to the graph.
    pub active_units_persisted: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    fn new(run_id: RunId, trigger: TriggerSource, mode: RunMode) -> Self {
        Self {
            run_id,
            trigger,
            mode,
            phase: RunPhase::Idle,
            failed_phase: None,
            error: None,
            statistics: RunStatistics::default(),
            fetch_failures: Vec::new(),
            link_failures: Vec::new(),
            active_units_persisted: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Completed
    }
}

/// Collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn UnitDirectory>,
    pub fetcher: Arc<dyn EntitlementFetcher>,
    pub registry: Arc<dyn Registry>,
    pub graph: Arc<dyn GraphStore>,
}

/// Reconciliation orchestrator.
pub struct Orchestrator {
    collaborators: Collaborators,
    store: EntitlementStore,
    config: SyncConfig,
    run_lock: Mutex<()>,
    phase: RwLock<RunPhase>,
    current: RwLock<Option<Arc<StatisticsTracker>>>,
    last_report: RwLock<Option<RunReport>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(collaborators: Collaborators, store: EntitlementStore, config: SyncConfig) -> Self {
        Self {
            collaborators,
            store,
            config,
            run_lock: Mutex::new(()),
            phase: RwLock::new(RunPhase::Idle),
            current: RwLock::new(None),
            last_report: RwLock::new(None),
        }
    }

    /// The store this orchestrator refreshes.
    #[must_use]
    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current phase. After a run, the final phase of that run.
    pub fn phase(&self) -> RunPhase {
        self.phase.read().map(|p| *p).unwrap_or(RunPhase::Idle)
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Report of the last finished run.
    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().ok().and_then(|r| r.clone())
    }

    /// Statistics of the run in flight.
    pub fn current_statistics(&self) -> Option<RunStatistics> {
        self.current
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|t| t.snapshot()))
    }

    fn set_phase(&self, phase: RunPhase) {
        if let Ok(mut current) = self.phase.write() {
            *current = phase;
        }
    }

    fn set_current(&self, tracker: Option<Arc<StatisticsTracker>>) {
        if let Ok(mut current) = self.current.write() {
            *current = tracker;
        }
    }

    /// Mode of a run started by `trigger`.
    #[must_use]
    pub fn mode_for(&self, trigger: TriggerSource) -> RunMode {
        let timed = matches!(trigger, TriggerSource::Startup | TriggerSource::Scheduled);
        if timed && !self.config.provision_on_schedule {
            RunMode::StoreOnly
        } else {
            RunMode::Full
        }
    }

    /// Run the reconciliation, in the mode configured for `trigger`.
    pub async fn resync(&self, trigger: TriggerSource) -> SyncResult<RunReport> {
        self.resync_with(trigger, self.mode_for(trigger)).await
    }

    /// Run the reconciliation in the given mode.
    ///
    /// Returns [`SyncError::AlreadyRunning`] when another run is in flight.
    /// Dropping the returned future before it settles records the run as
    /// aborted in the phase it had reached.
    pub async fn resync_with(&self, trigger: TriggerSource, mode: RunMode) -> SyncResult<RunReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!(trigger = %trigger, "Resync rejected, a run is already in flight");
            return Err(SyncError::AlreadyRunning);
        };

        let run_id = RunId::new();
        let tracker = Arc::new(StatisticsTracker::new());
        self.set_current(Some(Arc::clone(&tracker)));

        let mut report = RunReport::new(run_id, trigger, mode);
        let cancel = CancelGuard {
            orchestrator: self,
            report: Some(report.clone()),
            tracker: Arc::clone(&tracker),
        };
        let span = info_span!("resync", run_id = %run_id, trigger = %trigger);

        info!(parent: &span, mode = ?mode, "Resync started");
        let result = self
            .execute(mode, &tracker, &mut report)
            .instrument(span.clone())
            .await;
        cancel.disarm();

        report.statistics = tracker.snapshot();
        report.completed_at = Some(Utc::now());

        match &result {
            Ok(()) => {
                report.phase = RunPhase::Completed;
                info!(
                    parent: &span,
                    fetched = report.statistics.units_fetched,
                    failed = report.statistics.units_failed,
                    groups_linked = report.statistics.groups_linked,
                    duration_secs = report.statistics.duration_seconds,
                    "Resync completed"
                );
            }
            Err(e) => {
                report.phase = RunPhase::Aborted;
                report.failed_phase = Some(self.phase());
                report.error = Some(e.to_string());
                error!(
                    parent: &span,
                    phase = %self.phase(),
                    error = %e,
                    code = e.error_code(),
                    "Resync aborted"
                );
            }
        }

        self.finish(report.clone());
        result.map(|()| report)
    }

    /// Publish the final state of a run.
    fn finish(&self, report: RunReport) {
        self.set_phase(report.phase);
        self.set_current(None);
        if let Ok(mut last) = self.last_report.write() {
            *last = Some(report);
        }
    }

    async fn stage<T, F>(&self, phase: RunPhase, fut: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        self.set_phase(phase);
        let timeout_secs = self.config.stage_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::StageTimeout {
                phase,
                timeout_secs,
            }),
        }
    }

    async fn execute(
        &self,
        mode: RunMode,
        tracker: &StatisticsTracker,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let c = &self.collaborators;

        let units = self
            .stage(RunPhase::ListingUnits, async {
                c.directory.list_units().await.map_err(SyncError::Listing)
            })
            .await?;
        if units.is_empty() {
            return Err(SyncError::EmptyListing);
        }
        tracker.record_listing(units.len());

        let (fetched, persisted) = self
            .stage(RunPhase::FetchingEntitlements, async {
                let outcome = fetch_all(c.fetcher.as_ref(), &units).await;
                self.store.swap(outcome.records.clone()).await?;
                let persisted = self.persist_active(&outcome).await;
                Ok::<_, SyncError>((outcome, persisted))
            })
            .await?;

        let codes: BTreeSet<String> = fetched
            .records
            .values()
            .flat_map(|record| record.codes().map(str::to_string))
            .collect();

        tracker.record_fetch(
            fetched.records.len(),
            fetched.failed.len(),
            fetched.skipped.len(),
            codes.len(),
        );
        report.active_units_persisted = persisted;
        report.fetch_failures = fetched
            .failed
            .iter()
            .map(|f| FetchFailureReport {
                unit_id: f.unit_id.clone(),
                external_code: f.external_code.clone(),
                error_code: f.error_code.to_string(),
                message: f.message.clone(),
            })
            .collect();

        if mode == RunMode::StoreOnly {
            info!("Store-only run, skipping registry and graph provisioning");
            return Ok(());
        }

        if codes.is_empty() {
            info!("No entitlement code observed, skipping provisioning and linking");
        } else {
            let provisioned = self
                .stage(
                    RunPhase::Provisioning,
                    provision(c.registry.as_ref(), &codes, &self.config.provision),
                )
                .await?;
            tracker.record_provisioning(
                provisioned.applications_ensured,
                provisioned.roles_ensured,
            );

            let linked = self
                .stage(RunPhase::Linking, async {
                    Ok::<_, SyncError>(link_units(
                        c.registry.as_ref(),
                        &fetched.records,
                        &provisioned.cache,
                        &self.config.link,
                    )
                    .await)
                })
                .await?;
            tracker.record_linking(linked.groups_linked, linked.failures.len());
            report.link_failures = linked.failures;
        }

        let function = self
            .stage(RunPhase::BootstrappingFunction, async {
                bootstrap_function(c.graph.as_ref(), &self.config.function)
                    .await
                    .map_err(SyncError::Bootstrap)
            })
            .await?;
        tracker.record_function(function.units_granted, function.users_granted);

        Ok(())
    }

    async fn persist_active(&self, outcome: &FetchOutcome) -> bool {
        match persist_active_units(
            self.collaborators.graph.as_ref(),
            &outcome.active,
            &self.config.export_tag,
        )
        .await
        {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "Failed to persist active units");
                false
            }
        }
    }
}

/// Records an aborted run when a run future is dropped before it settles.
struct CancelGuard<'a> {
    orchestrator: &'a Orchestrator,
    report: Option<RunReport>,
    tracker: Arc<StatisticsTracker>,
}

impl CancelGuard<'_> {
    fn disarm(mut self) {
        self.report = None;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        let Some(mut report) = self.report.take() else {
            return;
        };
        let phase = self.orchestrator.phase();
        report.phase = RunPhase::Aborted;
        report.failed_phase = Some(phase);
        report.error = Some("run cancelled before completion".to_string());
        report.statistics = self.tracker.snapshot();
        report.completed_at = Some(Utc::now());
        warn!(run_id = %report.run_id, phase = %phase, "Resync cancelled");
        self.orchestrator.finish(report);
    }
}
