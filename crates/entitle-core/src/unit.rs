//! Organizational units.

use serde::{Deserialize, Serialize};

use crate::ids::UnitId;

/// An organizational unit as listed by the directory.
///
/// Units are sourced fresh on every run and never mutated by the
/// synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationalUnit {
    /// Internal identifier.
    pub id: UnitId,
    /// Code used as the lookup key on the remote entitlement service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_code: Option<String>,
}

impl OrganizationalUnit {
    /// Create a unit with an external code.
    pub fn new(id: impl Into<UnitId>, external_code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external_code: Some(external_code.into()),
        }
    }

    /// Create a unit the remote service cannot be queried for.
    pub fn without_code(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            external_code: None,
        }
    }

    /// The external code, if present and not blank.
    #[must_use]
    pub fn lookup_code(&self) -> Option<&str> {
        self.external_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}
