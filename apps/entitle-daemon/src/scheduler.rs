//! Startup and daily resync scheduling.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use entitle_sync::{Orchestrator, ScheduleConfig, SyncError, TriggerSource};

/// Spawn the scheduler: one startup resync, then one resync per day.
///
/// The loop exits when `shutdown` flips to `true`.
pub fn spawn_scheduler(
    orchestrator: Arc<Orchestrator>,
    schedule: ScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let startup_delay = Duration::from_secs(schedule.startup_delay_secs);
        if !startup_delay.is_zero() {
            info!(delay_secs = schedule.startup_delay_secs, "Startup resync delayed");
        }

        tokio::select! {
            () = tokio::time::sleep(startup_delay) => {
                run(&orchestrator, TriggerSource::Startup).await;
            }
            _ = shutdown.changed() => return,
        }

        loop {
            let now = Utc::now();
            let next = schedule.next_run(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Next scheduled resync");

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    run(&orchestrator, TriggerSource::Scheduled).await;
                }
                _ = shutdown.changed() => {
                    info!("Scheduler stopped");
                    return;
                }
            }
        }
    })
}

async fn run(orchestrator: &Orchestrator, trigger: TriggerSource) {
    match orchestrator.resync(trigger).await {
        Ok(report) => info!(
            trigger = %trigger,
            run_id = %report.run_id,
            units_fetched = report.statistics.units_fetched,
            units_failed = report.statistics.units_failed,
            "Resync finished"
        ),
        Err(SyncError::AlreadyRunning) => {
            info!(trigger = %trigger, "Resync skipped, a run is already in flight");
        }
        Err(e) => warn!(trigger = %trigger, error = %e, code = e.error_code(), "Resync failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entitle_core::OrganizationalUnit;
    use entitle_registry::{
        ApplicationDescriptor, GraphResult, GraphStore, GroupRoles, QueryResult, Registry,
        RegistryResult, RoleDescriptor, RoleSummary, Statement, UnitDirectory,
    };
    use entitle_sync::{Collaborators, EntitlementStore, RunPhase, SyncConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UnitDirectory for CountingDirectory {
        async fn list_units(&self) -> RegistryResult<Vec<OrganizationalUnit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct Unused;

    #[async_trait]
    impl entitle_client::EntitlementFetcher for Unused {
        async fn fetch(
            &self,
            unit: &OrganizationalUnit,
        ) -> entitle_client::ClientResult<entitle_core::EntitlementRecord> {
            Err(entitle_client::ClientError::MissingExternalCode {
                unit_id: unit.id.to_string(),
            })
        }
    }

    #[async_trait]
    impl Registry for Unused {
        async fn ensure_application(&self, _: &ApplicationDescriptor) -> RegistryResult<()> {
            Ok(())
        }
        async fn ensure_role(&self, _: &RoleDescriptor) -> RegistryResult<Option<String>> {
            Ok(None)
        }
        async fn list_roles(&self) -> RegistryResult<Vec<RoleSummary>> {
            Ok(Vec::new())
        }
        async fn list_groups_with_roles(
            &self,
            _: &entitle_core::UnitId,
        ) -> RegistryResult<Vec<GroupRoles>> {
            Ok(Vec::new())
        }
        async fn link_role_group(&self, _: &str, _: &[String]) -> RegistryResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl GraphStore for Unused {
        async fn execute_transaction(&self, _: &[Statement]) -> GraphResult<Vec<QueryResult>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_startup_resync_then_shutdown() {
        crate::logging::init_test_logging();
        let directory = Arc::new(CountingDirectory::default());
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                directory: directory.clone(),
                fetcher: Arc::new(Unused),
                registry: Arc::new(Unused),
                graph: Arc::new(Unused),
            },
            EntitlementStore::local(),
            SyncConfig::default(),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_scheduler(Arc::clone(&orchestrator), ScheduleConfig::default(), rx);

        for _ in 0..50 {
            if orchestrator.last_report().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.phase(), RunPhase::Aborted);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_startup_delay() {
        crate::logging::init_test_logging();
        let directory = Arc::new(CountingDirectory::default());
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators {
                directory: directory.clone(),
                fetcher: Arc::new(Unused),
                registry: Arc::new(Unused),
                graph: Arc::new(Unused),
            },
            EntitlementStore::local(),
            SyncConfig::default(),
        ));

        let schedule = ScheduleConfig {
            startup_delay_secs: 120,
            ..Default::default()
        };
        let (tx, rx) = watch::channel(false);
        let handle = spawn_scheduler(orchestrator, schedule, rx);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }
}
