//! Entitlement store.
//!
//! Maps each unit to the entitlement record of its latest successful fetch.
//! A run replaces the whole mapping at once: readers observe either the
//! previous generation or the new one, never a mix of both.
//!
//! Two backends are provided:
//!
//! - [`LocalBackend`]: process-local map behind a lock, swapped by pointer.
//! - [`PgBackend`]: PostgreSQL table shared by every node of a cluster,
//!   swapped inside one transaction.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

use entitle_core::{ApplicationEntitlement, EntitlementRecord, UnitId};

use crate::error::{StoreError, StoreResult};

/// Entitlements of every unit, keyed by unit.
pub type EntitlementMap = HashMap<UnitId, EntitlementRecord>;

/// Storage behind an [`EntitlementStore`].
#[async_trait]
pub trait EntitlementBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Replace the whole mapping atomically.
    async fn swap(&self, records: EntitlementMap) -> StoreResult<()>;

    /// External code of `unit` when it is entitled to `app_code`.
    async fn lookup(&self, unit: &UnitId, app_code: &str) -> StoreResult<Option<String>>;

    /// Copy of the current mapping.
    async fn snapshot(&self) -> StoreResult<EntitlementMap>;

    /// Number of units in the current mapping.
    async fn len(&self) -> StoreResult<usize>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct LocalBackend {
    current: RwLock<Arc<EntitlementMap>>,
}

impl LocalBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> StoreResult<Arc<EntitlementMap>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl EntitlementBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn swap(&self, records: EntitlementMap) -> StoreResult<()> {
        let next = Arc::new(records);
        let mut guard = self.current.write().map_err(|_| StoreError::Poisoned)?;
        *guard = next;
        Ok(())
    }

    async fn lookup(&self, unit: &UnitId, app_code: &str) -> StoreResult<Option<String>> {
        let current = self.current()?;
        Ok(current
            .get(unit)
            .filter(|record| record.has_application(app_code))
            .map(|record| record.external_code.clone()))
    }

    async fn snapshot(&self) -> StoreResult<EntitlementMap> {
        Ok(self.current()?.as_ref().clone())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.current()?.len())
    }
}

/// Table holding the replicated mapping.
const TABLE_DDL: &str = r"
CREATE TABLE IF NOT EXISTS unit_entitlements (
    unit_id TEXT PRIMARY KEY,
    external_code TEXT NOT NULL,
    applications TEXT[] NOT NULL,
    refreshed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

/// Cluster-wide backend stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(TABLE_DDL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EntitlementBackend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, records), fields(units = records.len()))]
    async fn swap(&self, records: EntitlementMap) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM unit_entitlements")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for (unit_id, record) in &records {
            let applications: Vec<String> = record.codes().map(str::to_string).collect();
            sqlx::query(
                "INSERT INTO unit_entitlements (unit_id, external_code, applications) VALUES ($1, $2, $3)",
            )
            .bind(unit_id.as_str())
            .bind(&record.external_code)
            .bind(&applications)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(removed, inserted = records.len(), "Replicated entitlements swapped");
        Ok(())
    }

    async fn lookup(&self, unit: &UnitId, app_code: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT external_code FROM unit_entitlements WHERE unit_id = $1 AND $2 = ANY(applications)",
        )
        .bind(unit.as_str())
        .bind(app_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(code,)| code))
    }

    async fn snapshot(&self) -> StoreResult<EntitlementMap> {
        let rows: Vec<(String, String, Vec<String>)> = sqlx::query_as(
            "SELECT unit_id, external_code, applications FROM unit_entitlements",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(unit_id, external_code, applications)| {
                let applications = applications
                    .into_iter()
                    .map(ApplicationEntitlement::new)
                    .collect();
                (
                    UnitId::from(unit_id),
                    EntitlementRecord::new(external_code, applications),
                )
            })
            .collect())
    }

    async fn len(&self) -> StoreResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM unit_entitlements")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Shared, injectable handle to the entitlement mapping.
#[derive(Clone)]
pub struct EntitlementStore {
    backend: Arc<dyn EntitlementBackend>,
}

impl std::fmt::Debug for EntitlementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementStore")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::local()
    }
}

impl EntitlementStore {
    pub fn new(backend: Arc<dyn EntitlementBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a process-local map.
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalBackend::new()))
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Replace the mapping with the records of the latest run.
    pub async fn swap(&self, records: EntitlementMap) -> StoreResult<()> {
        let units = records.len();
        self.backend.swap(records).await?;
        info!(backend = self.backend.name(), units, "Entitlement store swapped");
        Ok(())
    }

    /// External code of `unit` when it is entitled to `app_code`.
    pub async fn lookup(&self, unit: &UnitId, app_code: &str) -> StoreResult<Option<String>> {
        self.backend.lookup(unit, app_code).await
    }

    /// External code of the first unit, in the given order, entitled to
    /// `app_code`.
    pub async fn lookup_first(
        &self,
        units: &[UnitId],
        app_code: &str,
    ) -> StoreResult<Option<String>> {
        for unit in units {
            if let Some(code) = self.backend.lookup(unit, app_code).await? {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    pub async fn snapshot(&self) -> StoreResult<EntitlementMap> {
        self.backend.snapshot().await
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.backend.len().await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}
