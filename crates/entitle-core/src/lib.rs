//! # Entitlement Core
//!
//! Shared types for the entitlement synchronizer.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`UnitId`, `RunId`)
//! - [`unit`] - Organizational units as listed by the directory
//! - [`entitlement`] - Entitlement records fetched from the remote service
//!
//! # Example
//!
//! ```
//! use entitle_core::{ApplicationEntitlement, EntitlementRecord, UnitId};
//!
//! let record = EntitlementRecord::new(
//!     "0123456A",
//!     vec![ApplicationEntitlement::new("AGENDA")],
//! );
//!
//! assert!(record.has_application("AGENDA"));
//! assert_eq!(UnitId::from("unit-1").as_str(), "unit-1");
//! ```

pub mod entitlement;
pub mod ids;
pub mod unit;

pub use entitlement::{ApplicationEntitlement, EntitlementRecord};
pub use ids::{ParseIdError, RunId, UnitId};
pub use unit::OrganizationalUnit;
