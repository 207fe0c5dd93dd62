//! Group-role linking.
//!
//! For every entitled unit, each of its groups receives the roles of the
//! unit's entitlements while keeping the roles this synchronizer does not
//! manage.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use entitle_core::{EntitlementRecord, UnitId};
use entitle_registry::{GroupRoles, Registry};

use crate::provisioner::RoleCache;
use crate::store::EntitlementMap;

/// Restricted-code scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Entitlement code only granted to restricted-access groups.
    #[serde(default = "default_restricted_code")]
    pub restricted_code: String,
    /// Marker a group name contains when it is a restricted-access group.
    #[serde(default = "default_restricted_marker")]
    pub restricted_marker: String,
    /// Units linked concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_restricted_code() -> String {
    "SCOLARITE".to_string()
}

fn default_restricted_marker() -> String {
    "-SCOLARITE".to_string()
}

fn default_max_concurrent() -> usize {
    8
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            restricted_code: default_restricted_code(),
            restricted_marker: default_restricted_marker(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl LinkConfig {
    /// Whether `code` may be granted to the group named `group_name`.
    #[must_use]
    pub fn allows(&self, code: &str, group_name: &str) -> bool {
        code != self.restricted_code || group_name.contains(&self.restricted_marker)
    }
}

/// A unit whose links could not all be applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkFailure {
    pub unit_id: UnitId,
    /// Group being linked when the failure happened, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub message: String,
}

/// Result of a linking pass.
#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    /// Units whose groups were all linked.
    pub units_linked: u32,
    /// Groups successfully linked.
    pub groups_linked: u32,
    pub failures: Vec<LinkFailure>,
}

/// Compute the role identifiers of a group.
///
/// Keeps the existing identifiers not managed by this run, then appends the
/// identifiers of the unit's codes allowed for the group. Duplicates are
/// dropped, first occurrence wins. Codes without a cached identifier are
/// skipped.
pub fn compute_role_ids(
    group: &GroupRoles,
    record: &EntitlementRecord,
    cache: &RoleCache,
    config: &LinkConfig,
) -> Vec<String> {
    let managed: HashSet<&str> = cache.managed_ids().collect();
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for id in &group.roles {
        if !managed.contains(id.as_str()) && seen.insert(id.as_str()) {
            ids.push(id.clone());
        }
    }

    for code in record.codes() {
        if !config.allows(code, &group.name) {
            continue;
        }
        match cache.get(code) {
            Some(id) => {
                if seen.insert(id) {
                    ids.push(id.to_string());
                }
            }
            None => warn!(code = %code, group_id = %group.id, "No role identifier for code"),
        }
    }

    ids
}

async fn link_unit(
    registry: &dyn Registry,
    unit_id: &UnitId,
    record: &EntitlementRecord,
    cache: &RoleCache,
    config: &LinkConfig,
) -> Result<u32, LinkFailure> {
    let groups = registry
        .list_groups_with_roles(unit_id)
        .await
        .map_err(|e| LinkFailure {
            unit_id: unit_id.clone(),
            group_id: None,
            message: e.to_string(),
        })?;

    let mut linked = 0;
    for group in &groups {
        let role_ids = compute_role_ids(group, record, cache, config);
        registry
            .link_role_group(&group.id, &role_ids)
            .await
            .map_err(|e| LinkFailure {
                unit_id: unit_id.clone(),
                group_id: Some(group.id.clone()),
                message: e.to_string(),
            })?;
        debug!(unit_id = %unit_id, group_id = %group.id, roles = role_ids.len(), "Group linked");
        linked += 1;
    }

    Ok(linked)
}

/// Link every entitled unit's groups.
///
/// Units are processed independently, at most `config.max_concurrent` at a
/// time. A unit's groups are processed in order and the first failure stops
/// that unit only.
#[instrument(skip_all, fields(units = records.len()))]
pub async fn link_units(
    registry: &dyn Registry,
    records: &EntitlementMap,
    cache: &RoleCache,
    config: &LinkConfig,
) -> LinkOutcome {
    let mut entitled: Vec<_> = records
        .iter()
        .filter(|(_, record)| !record.is_empty())
        .collect();
    entitled.sort_by(|a, b| a.0.cmp(b.0));

    let permits = Semaphore::new(config.max_concurrent.max(1));
    let results = join_all(entitled.iter().map(|(unit_id, record)| {
        let permits = &permits;
        async move {
            let _permit = permits.acquire().await.map_err(|e| LinkFailure {
                unit_id: (*unit_id).clone(),
                group_id: None,
                message: format!("link semaphore closed: {e}"),
            })?;
            link_unit(registry, unit_id, record, cache, config).await
        }
    }))
    .await;

    let mut outcome = LinkOutcome::default();
    for result in results {
        match result {
            Ok(groups) => {
                outcome.units_linked += 1;
                outcome.groups_linked += groups;
            }
            Err(failure) => {
                warn!(
                    unit_id = %failure.unit_id,
                    group_id = ?failure.group_id,
                    error = %failure.message,
                    "Failed to link unit groups"
                );
                outcome.failures.push(failure);
            }
        }
    }

    info!(
        units_linked = outcome.units_linked,
        groups_linked = outcome.groups_linked,
        failed = outcome.failures.len(),
        "Linking completed"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entitle_core::ApplicationEntitlement;
    use entitle_registry::{
        ApplicationDescriptor, RegistryError, RegistryResult, RoleDescriptor, RoleSummary,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn record(apps: &[&str]) -> EntitlementRecord {
        EntitlementRecord::new(
            "0123456A",
            apps.iter().map(|a| ApplicationEntitlement::new(*a)).collect(),
        )
    }

    fn cache() -> RoleCache {
        [("AGENDA", "r-agenda"), ("NOTES", "r-notes"), ("SCOLARITE", "r-scol")]
            .into_iter()
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .collect()
    }

    fn group(id: &str, name: &str, roles: &[&str]) -> GroupRoles {
        GroupRoles {
            id: id.to_string(),
            name: name.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_scoping_rule() {
        let config = LinkConfig::default();
        let r = record(&["SCOLARITE", "NOTES"]);

        let g1 = group("g1", "LYCEE X-SCOLARITE", &[]);
        let g2 = group("g2", "LYCEE X-Enseignants", &[]);

        assert_eq!(
            compute_role_ids(&g1, &r, &cache(), &config),
            vec!["r-scol", "r-notes"]
        );
        assert_eq!(compute_role_ids(&g2, &r, &cache(), &config), vec!["r-notes"]);
    }

    #[test]
    fn test_replaces_managed_and_keeps_foreign_roles() {
        let config = LinkConfig::default();
        let g = group("g1", "Teachers", &["r-foreign", "r-agenda", "r-notes"]);
        let ids = compute_role_ids(&g, &record(&["NOTES"]), &cache(), &config);
        assert_eq!(ids, vec!["r-foreign", "r-notes"]);
    }

    #[test]
    fn test_deduplicates_preserving_order() {
        let config = LinkConfig::default();
        let g = group("g1", "Teachers", &["r-x", "r-x"]);
        let ids = compute_role_ids(&g, &record(&["AGENDA", "AGENDA"]), &cache(), &config);
        assert_eq!(ids, vec!["r-x", "r-agenda"]);
    }

    #[test]
    fn test_uncached_codes_are_skipped() {
        let config = LinkConfig::default();
        let g = group("g1", "Teachers", &[]);
        let ids = compute_role_ids(&g, &record(&["TEXTES", "AGENDA"]), &cache(), &config);
        assert_eq!(ids, vec!["r-agenda"]);
    }

    #[derive(Default)]
    struct LinkRegistry {
        groups: HashMap<String, Vec<GroupRoles>>,
        failing_group: Option<String>,
        links: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl Registry for LinkRegistry {
        async fn ensure_application(&self, _: &ApplicationDescriptor) -> RegistryResult<()> {
            Ok(())
        }

        async fn ensure_role(&self, _: &RoleDescriptor) -> RegistryResult<Option<String>> {
            Ok(None)
        }

        async fn list_roles(&self) -> RegistryResult<Vec<RoleSummary>> {
            Ok(vec![])
        }

        async fn list_groups_with_roles(&self, unit: &UnitId) -> RegistryResult<Vec<GroupRoles>> {
            self.groups
                .get(unit.as_str())
                .cloned()
                .ok_or_else(|| RegistryError::Rejected {
                    action: "list-groups-with-roles".into(),
                    message: "unknown structure".into(),
                })
        }

        async fn link_role_group(&self, group_id: &str, role_ids: &[String]) -> RegistryResult<()> {
            if self.failing_group.as_deref() == Some(group_id) {
                return Err(RegistryError::Timeout { timeout_secs: 30 });
            }
            self.links
                .lock()
                .unwrap()
                .push((group_id.to_string(), role_ids.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_unit_does_not_block_others() {
        let mut groups = HashMap::new();
        groups.insert(
            "u1".to_string(),
            vec![group("g1a", "A", &[]), group("g1b", "B", &[])],
        );
        groups.insert("u2".to_string(), vec![group("g2", "C", &[])]);

        let registry = LinkRegistry {
            groups,
            failing_group: Some("g1a".into()),
            ..Default::default()
        };

        let mut records = EntitlementMap::new();
        records.insert(UnitId::from("u1"), record(&["AGENDA"]));
        records.insert(UnitId::from("u2"), record(&["NOTES"]));
        records.insert(UnitId::from("u3"), record(&[]));

        let outcome = link_units(&registry, &records, &cache(), &LinkConfig::default()).await;

        assert_eq!(outcome.units_linked, 1);
        assert_eq!(outcome.groups_linked, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit_id, UnitId::from("u1"));
        assert_eq!(outcome.failures[0].group_id.as_deref(), Some("g1a"));

        // The failing group stops its unit: g1b is never linked.
        let links = registry.links.lock().unwrap();
        assert_eq!(
            *links,
            vec![("g2".to_string(), vec!["r-notes".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported() {
        let registry = LinkRegistry::default();
        let mut records = EntitlementMap::new();
        records.insert(UnitId::from("missing"), record(&["AGENDA"]));

        let outcome = link_units(&registry, &records, &cache(), &LinkConfig::default()).await;
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].group_id.is_none());
    }

    #[derive(Default)]
    struct SlowRegistry {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Registry for SlowRegistry {
        async fn ensure_application(&self, _: &ApplicationDescriptor) -> RegistryResult<()> {
            Ok(())
        }

        async fn ensure_role(&self, _: &RoleDescriptor) -> RegistryResult<Option<String>> {
            Ok(None)
        }

        async fn list_roles(&self) -> RegistryResult<Vec<RoleSummary>> {
            Ok(vec![])
        }

        async fn list_groups_with_roles(&self, _: &UnitId) -> RegistryResult<Vec<GroupRoles>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![group("g", "Teachers", &[])])
        }

        async fn link_role_group(&self, _: &str, _: &[String]) -> RegistryResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_linking_concurrency_is_bounded() {
        let registry = SlowRegistry::default();
        let mut records = EntitlementMap::new();
        for i in 0..12 {
            records.insert(UnitId::from(format!("u{i}")), record(&["AGENDA"]));
        }
        let config = LinkConfig {
            max_concurrent: 3,
            ..Default::default()
        };

        let outcome = link_units(&registry, &records, &cache(), &config).await;

        assert_eq!(outcome.units_linked, 12);
        assert_eq!(outcome.groups_linked, 12);
        assert!(registry.peak.load(Ordering::SeqCst) <= 3);
        assert!(registry.peak.load(Ordering::SeqCst) > 1);
    }
}
