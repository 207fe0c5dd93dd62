//! Run phases.

use serde::{Deserialize, Serialize};

/// Phase of a reconciliation run.
///
/// Phases advance in declaration order; `Aborted` is reachable from any
/// phase and, like `Completed`, is terminal for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in flight.
    Idle,
    /// Listing units from the directory.
    ListingUnits,
    /// Fetching per-unit entitlements.
    FetchingEntitlements,
    /// Ensuring applications and roles.
    Provisioning,
    /// Linking roles to unit groups.
    Linking,
    /// Granting the restricted function.
    BootstrappingFunction,
    /// Run finished.
    Completed,
    /// Run stopped on an unrecoverable failure.
    Aborted,
}

impl RunPhase {
    /// Whether the phase ends a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether a run is executing in this phase.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ListingUnits => write!(f, "listing_units"),
            Self::FetchingEntitlements => write!(f, "fetching_entitlements"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Linking => write!(f, "linking"),
            Self::BootstrappingFunction => write!(f, "bootstrapping_function"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for RunPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "listing_units" => Ok(Self::ListingUnits),
            "fetching_entitlements" => Ok(Self::FetchingEntitlements),
            "provisioning" => Ok(Self::Provisioning),
            "linking" => Ok(Self::Linking),
            "bootstrapping_function" => Ok(Self::BootstrappingFunction),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid run phase: {s}")),
        }
    }
}
