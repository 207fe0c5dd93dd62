//! Reconciliation error types.

use thiserror::Error;

use entitle_registry::{GraphError, RegistryError};

use crate::phase::RunPhase;

/// Error of the entitlement store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database failure of the replicated backend.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Lock poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Check if this error is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            StoreError::Poisoned => false,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error that aborts a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run is in flight.
    #[error("a resync is already running")]
    AlreadyRunning,

    /// The directory could not be listed.
    #[error("failed to list units: {0}")]
    Listing(#[source] RegistryError),

    /// The directory listed no unit.
    #[error("directory returned no unit")]
    EmptyListing,

    /// An application could not be ensured.
    #[error("failed to ensure application {code}: {source}")]
    ApplicationProvisioning {
        code: String,
        #[source]
        source: RegistryError,
    },

    /// A role could not be ensured.
    #[error("failed to ensure role {code}: {source}")]
    RoleProvisioning {
        code: String,
        #[source]
        source: RegistryError,
    },

    /// Role identifiers could not be resolved.
    #[error("failed to list roles: {0}")]
    RoleListing(#[source] RegistryError),

    /// The function bootstrap failed.
    #[error("function bootstrap failed: {0}")]
    Bootstrap(#[source] GraphError),

    /// The entitlement store could not be updated.
    #[error("entitlement store error: {0}")]
    Store(#[from] StoreError),

    /// A stage exceeded its time budget.
    #[error("stage {phase} timed out after {timeout_secs} seconds")]
    StageTimeout { phase: RunPhase, timeout_secs: u64 },
}

impl SyncError {
    /// Check if a later run is likely to succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::AlreadyRunning | SyncError::StageTimeout { .. } => true,
            SyncError::Listing(e) | SyncError::RoleListing(e) => e.is_transient(),
            SyncError::ApplicationProvisioning { source, .. }
            | SyncError::RoleProvisioning { source, .. } => source.is_transient(),
            SyncError::Bootstrap(e) => e.is_transient(),
            SyncError::Store(e) => e.is_transient(),
            SyncError::EmptyListing => false,
        }
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::AlreadyRunning => "ALREADY_RUNNING",
            SyncError::Listing(_) => "LISTING_FAILED",
            SyncError::EmptyListing => "EMPTY_LISTING",
            SyncError::ApplicationProvisioning { .. } => "APPLICATION_PROVISIONING_FAILED",
            SyncError::RoleProvisioning { .. } => "ROLE_PROVISIONING_FAILED",
            SyncError::RoleListing(_) => "ROLE_LISTING_FAILED",
            SyncError::Bootstrap(_) => "BOOTSTRAP_FAILED",
            SyncError::Store(_) => "STORE_ERROR",
            SyncError::StageTimeout { .. } => "STAGE_TIMEOUT",
        }
    }
}

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;
