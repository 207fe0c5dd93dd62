//! Application registry: applications, roles and group-role links.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use entitle_core::UnitId;

use crate::bus::HttpBus;
use crate::error::RegistryResult;

/// An external application to ensure in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
    pub name: String,
    pub display_name: String,
    pub address: String,
}

impl ApplicationDescriptor {
    /// Build the descriptor of an entitlement code.
    ///
    /// The display name is the lower-cased code and the address is
    /// `<address_prefix>/<lower-cased code>`.
    pub fn for_code(code: &str, address_prefix: &str) -> Self {
        let lower = code.to_lowercase();
        Self {
            name: code.to_string(),
            address: format!("{}/{}", address_prefix.trim_end_matches('/'), lower),
            display_name: lower,
        }
    }
}

/// A role to ensure in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    pub actions: Vec<String>,
}

impl RoleDescriptor {
    /// Build the role granting access to an entitlement code.
    pub fn for_code(code: &str, action_namespace: &str) -> Self {
        Self {
            name: code.to_string(),
            actions: vec![
                format!("{code}|address"),
                format!("{action_namespace}|{}", code.to_lowercase()),
            ],
        }
    }
}

/// A role as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSummary {
    pub id: String,
    pub name: String,
}

/// A group of a unit together with its current role identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoles {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Operations the synchronizer needs from the application registry.
///
/// Every write is an idempotent "ensure" or a full replacement, so a run can
/// be resubmitted after a partial failure.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Ensure an external application exists.
    ///
    /// Returns [`crate::RegistryError::AlreadyExists`] when the registry
    /// reports a duplicate; callers treat it as success.
    async fn ensure_application(&self, application: &ApplicationDescriptor)
        -> RegistryResult<()>;

    /// Ensure a role exists. Returns its identifier when the reply carries one.
    async fn ensure_role(&self, role: &RoleDescriptor) -> RegistryResult<Option<String>>;

    /// List every role known to the registry.
    async fn list_roles(&self) -> RegistryResult<Vec<RoleSummary>>;

    /// List the groups of a unit with their role identifiers.
    async fn list_groups_with_roles(&self, unit_id: &UnitId) -> RegistryResult<Vec<GroupRoles>>;

    /// Replace the role identifiers of a group.
    async fn link_role_group(&self, group_id: &str, role_ids: &[String]) -> RegistryResult<()>;
}

/// [`Registry`] backed by the JSON message bus.
#[derive(Debug, Clone)]
pub struct BusRegistry {
    bus: HttpBus,
}

impl BusRegistry {
    pub fn new(bus: HttpBus) -> Self {
        Self { bus }
    }

    async fn call(&self, action: &str, body: Value) -> RegistryResult<Option<Value>> {
        self.bus.send_registry(&body).await?.into_result(action)
    }

    async fn call_array(&self, action: &str, body: Value) -> RegistryResult<Vec<Value>> {
        self.bus.send_registry(&body).await?.into_array(action)
    }
}

/// Decode the rows of an array reply. Rows that do not decode are skipped.
fn decode_items<T: serde::de::DeserializeOwned>(action: &str, items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(action, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Registry for BusRegistry {
    #[instrument(skip(self, application), fields(name = %application.name))]
    async fn ensure_application(
        &self,
        application: &ApplicationDescriptor,
    ) -> RegistryResult<()> {
        self.call(
            "create-external-application",
            json!({
                "action": "create-external-application",
                "application": application,
            }),
        )
        .await?;
        debug!("Application ensured");
        Ok(())
    }

    #[instrument(skip(self, role), fields(name = %role.name))]
    async fn ensure_role(&self, role: &RoleDescriptor) -> RegistryResult<Option<String>> {
        let result = self
            .call(
                "create-role",
                json!({
                    "action": "create-role",
                    "role": { "name": role.name },
                    "actions": role.actions,
                }),
            )
            .await?;

        let id = result
            .as_ref()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(role_id = ?id, "Role ensured");
        Ok(id)
    }

    async fn list_roles(&self) -> RegistryResult<Vec<RoleSummary>> {
        let items = self
            .call_array("list-roles", json!({ "action": "list-roles" }))
            .await?;
        Ok(decode_items("list-roles", items))
    }

    async fn list_groups_with_roles(&self, unit_id: &UnitId) -> RegistryResult<Vec<GroupRoles>> {
        let items = self
            .call_array(
                "list-groups-with-roles",
                json!({
                    "action": "list-groups-with-roles",
                    "structureId": unit_id.as_str(),
                }),
            )
            .await?;
        Ok(decode_items("list-groups-with-roles", items))
    }

    async fn link_role_group(&self, group_id: &str, role_ids: &[String]) -> RegistryResult<()> {
        self.call(
            "link-role-group",
            json!({
                "action": "link-role-group",
                "groupId": group_id,
                "roleIds": role_ids,
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_descriptor() {
        let app = ApplicationDescriptor::for_code("AGENDA", "/eliot/");
        assert_eq!(app.name, "AGENDA");
        assert_eq!(app.display_name, "agenda");
        assert_eq!(app.address, "/eliot/agenda");

        let json = serde_json::to_value(&app).unwrap();
        assert_eq!(json["displayName"], "agenda");
    }

    #[test]
    fn test_role_descriptor_actions() {
        let role = RoleDescriptor::for_code("NOTES", "fr.wseduc.eliot.controllers.EliotController");
        assert_eq!(role.name, "NOTES");
        assert_eq!(
            role.actions,
            vec![
                "NOTES|address".to_string(),
                "fr.wseduc.eliot.controllers.EliotController|notes".to_string()
            ]
        );
    }

    #[test]
    fn test_group_roles_defaults() {
        let group: GroupRoles = serde_json::from_value(serde_json::json!({"id": "g1"})).unwrap();
        assert!(group.name.is_empty());
        assert!(group.roles.is_empty());
    }
}
