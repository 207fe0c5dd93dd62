//! Application and role provisioning.
//!
//! For the distinct entitlement codes of a run: ensure every application,
//! then every role, then resolve the role identifiers from the registry. Each
//! fan-out settles fully before the next one starts.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, info, instrument, warn};

use entitle_registry::{ApplicationDescriptor, Registry, RegistryResult, RoleDescriptor};

use crate::error::{SyncError, SyncResult};

/// Naming of the registry objects created for entitlement codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Prefix of application addresses.
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
    /// Namespace of the second role action.
    #[serde(default = "default_action_namespace")]
    pub action_namespace: String,
}

fn default_address_prefix() -> String {
    "/eliot".to_string()
}

fn default_action_namespace() -> String {
    "fr.wseduc.eliot.controllers.EliotController".to_string()
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            address_prefix: default_address_prefix(),
            action_namespace: default_action_namespace(),
        }
    }
}

/// Role identifiers resolved during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleCache {
    ids: HashMap<String, String>,
}

impl RoleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: impl Into<String>, id: impl Into<String>) {
        self.ids.insert(code.into(), id.into());
    }

    /// Role identifier of an entitlement code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&str> {
        self.ids.get(code).map(String::as_str)
    }

    /// Every role identifier managed by this run.
    pub fn managed_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.values().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<(String, String)> for RoleCache {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Result of a provisioning pass.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOutcome {
    pub cache: RoleCache,
    /// Applications created or already present.
    pub applications_ensured: u32,
    /// Roles created or already present.
    pub roles_ensured: u32,
}

fn accept_existing<T: Default>(result: RegistryResult<T>) -> RegistryResult<T> {
    match result {
        Err(e) if e.is_already_exists() => Ok(T::default()),
        other => other,
    }
}

/// Ensure applications and roles for every code and resolve role identifiers.
///
/// An empty code set is a no-op returning an empty cache.
#[instrument(skip(registry, codes, config), fields(codes = codes.len()))]
pub async fn provision(
    registry: &dyn Registry,
    codes: &BTreeSet<String>,
    config: &ProvisionConfig,
) -> SyncResult<ProvisionOutcome> {
    if codes.is_empty() {
        info!("No entitlement code observed, skipping provisioning");
        return Ok(ProvisionOutcome::default());
    }

    let applications: Vec<_> = codes
        .iter()
        .map(|code| ApplicationDescriptor::for_code(code, &config.address_prefix))
        .collect();

    let results = join_all(applications.iter().map(|app| async move {
        accept_existing(registry.ensure_application(app).await)
    }))
    .await;

    for (app, result) in applications.iter().zip(results) {
        if let Err(source) = result {
            error!(code = %app.name, error = %source, "Failed to ensure application");
            return Err(SyncError::ApplicationProvisioning {
                code: app.name.clone(),
                source,
            });
        }
    }
    debug!(count = applications.len(), "Applications ensured");

    let roles: Vec<_> = codes
        .iter()
        .map(|code| RoleDescriptor::for_code(code, &config.action_namespace))
        .collect();

    let results = join_all(
        roles
            .iter()
            .map(|role| async move { accept_existing(registry.ensure_role(role).await) }),
    )
    .await;

    let mut cache = RoleCache::new();
    for (role, result) in roles.iter().zip(results) {
        match result {
            Ok(Some(id)) => cache.insert(role.name.clone(), id),
            Ok(None) => {}
            Err(source) => {
                error!(code = %role.name, error = %source, "Failed to ensure role");
                return Err(SyncError::RoleProvisioning {
                    code: role.name.clone(),
                    source,
                });
            }
        }
    }
    debug!(count = roles.len(), "Roles ensured");

    let listed = registry.list_roles().await.map_err(|e| {
        error!(error = %e, "Failed to list roles");
        SyncError::RoleListing(e)
    })?;

    for role in listed {
        if codes.contains(&role.name) {
            cache.insert(role.name, role.id);
        }
    }

    for code in codes {
        if cache.get(code).is_none() {
            warn!(code = %code, "No role identifier resolved for code");
        }
    }

    info!(
        applications = applications.len(),
        roles = roles.len(),
        resolved = cache.len(),
        "Provisioning completed"
    );

    Ok(ProvisionOutcome {
        cache,
        applications_ensured: u32::try_from(applications.len()).unwrap_or(u32::MAX),
        roles_ensured: u32::try_from(roles.len()).unwrap_or(u32::MAX),
    })
}
