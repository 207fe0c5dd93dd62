//! # Entitlement Synchronization
//!
//! Reconciles the registry and the permission graph with the entitlements
//! reported by the per-unit web service.
//!
//! A run moves through the phases of [`RunPhase`]:
//!
//! 1. list the units from the directory;
//! 2. fetch every unit's entitlements, swap the [`EntitlementStore`] and tag
//!    the active units;
//! 3. ensure an application and a role per entitlement code;
//! 4. link the roles to each unit's groups;
//! 5. grant the restricted function to qualifying users.
//!
//! Units fail independently during fetching and linking; listing,
//! provisioning and bootstrap failures abort the run. The [`Orchestrator`]
//! runs at most one reconciliation at a time.
//!
//! ## Example
//!
//! ```ignore
//! use entitle_sync::{Collaborators, EntitlementStore, Orchestrator, SyncConfig, TriggerSource};
//!
//! let orchestrator = Orchestrator::new(collaborators, EntitlementStore::local(), SyncConfig::default());
//! let report = orchestrator.resync(TriggerSource::Manual).await?;
//! println!("{} units fetched", report.statistics.units_fetched);
//! ```

pub mod active_units;
pub mod bootstrap;
pub mod error;
pub mod linker;
pub mod orchestrator;
pub mod phase;
pub mod provisioner;
pub mod schedule;
pub mod statistics;
pub mod store;
pub mod trigger;

pub use bootstrap::{BootstrapOutcome, FunctionConfig};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use linker::{compute_role_ids, LinkConfig, LinkFailure, LinkOutcome};
pub use orchestrator::{
    Collaborators, FetchFailureReport, Orchestrator, RunMode, RunReport, SyncConfig, TriggerSource,
};
pub use phase::RunPhase;
pub use provisioner::{ProvisionConfig, RoleCache};
pub use schedule::ScheduleConfig;
pub use statistics::{RunStatistics, StatisticsTracker};
pub use store::{EntitlementBackend, EntitlementMap, EntitlementStore, LocalBackend, PgBackend};
pub use trigger::{
    schedule_delayed_resync, TriggerConfig, TriggerDecision, TriggerEvent, TriggerPolicy,
};
