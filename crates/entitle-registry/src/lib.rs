//! # Entitlement Collaborators
//!
//! Interfaces to the external systems the synchronizer drives, with the
//! transports used in production:
//!
//! - [`Registry`]: applications, roles and group-role links, reached over the
//!   JSON message bus ([`BusRegistry`]).
//! - [`UnitDirectory`]: the list of organizational units ([`BusDirectory`]).
//! - [`GraphStore`]: the permission graph, reached through its transactional
//!   HTTP endpoint ([`HttpGraphStore`]).
//!
//! The synchronizer only depends on the traits, so tests substitute in-memory
//! implementations.

pub mod bus;
pub mod directory;
pub mod error;
pub mod graph;
pub mod registry;

pub use bus::{BusConfig, BusReply, HttpBus};
pub use directory::{BusDirectory, UnitDirectory};
pub use error::{GraphError, GraphResult, RegistryError, RegistryResult};
pub use graph::{GraphConfig, GraphStore, HttpGraphStore, QueryResult, Statement};
pub use registry::{
    ApplicationDescriptor, BusRegistry, GroupRoles, Registry, RoleDescriptor, RoleSummary,
};
