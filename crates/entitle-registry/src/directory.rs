//! Directory of organizational units.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use entitle_core::OrganizationalUnit;

use crate::bus::HttpBus;
use crate::error::{RegistryError, RegistryResult};

/// Source of the organizational units a run iterates over.
#[async_trait]
pub trait UnitDirectory: Send + Sync {
    /// List every unit with its external code.
    async fn list_units(&self) -> RegistryResult<Vec<OrganizationalUnit>>;
}

/// Directory row as returned by `list-structures`.
#[derive(Debug, Deserialize)]
struct StructureRow {
    id: String,
    #[serde(rename = "UAI", default)]
    uai: Option<String>,
}

/// [`UnitDirectory`] backed by the JSON message bus.
#[derive(Debug, Clone)]
pub struct BusDirectory {
    bus: HttpBus,
}

impl BusDirectory {
    pub fn new(bus: HttpBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl UnitDirectory for BusDirectory {
    #[instrument(skip(self))]
    async fn list_units(&self) -> RegistryResult<Vec<OrganizationalUnit>> {
        let items = self
            .bus
            .send_directory(&json!({
                "action": "list-structures",
                "fields": ["id", "UAI"],
            }))
            .await?
            .into_array("list-structures")?;

        let units = items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<StructureRow>(item)
                    .map(|row| OrganizationalUnit {
                        id: row.id.into(),
                        external_code: row.uai,
                    })
                    .map_err(|e| RegistryError::invalid_response(format!("list-structures: {e}")))
            })
            .collect::<RegistryResult<Vec<_>>>()?;

        debug!(count = units.len(), "Listed units");
        Ok(units)
    }
}
