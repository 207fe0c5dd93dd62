//! # Entitlement Client
//!
//! Fetches the entitlements of organizational units from the remote
//! entitlement web service.
//!
//! One `GET <base>?appli=<code>&rne=<externalCode>` is issued per unit. The
//! reply is a fixed-schema XML list:
//!
//! ```text
//! <LIST>
//!   <APPLI code="AGENDA"/>
//!   <APPLI code="NOTES"/>
//! </LIST>
//! ```
//!
//! Requests run concurrently, bounded by a shared semaphore sized like the
//! underlying connection pool. A failing unit never fails the fan-out: it is
//! logged and reported in [`FetchOutcome::failed`].
//!
//! ## Example
//!
//! ```ignore
//! use entitle_client::{fetch_all, ClientConfig, EntitlementClient};
//!
//! let config = ClientConfig::new("https://entitlements.example.org/ws", "ENT");
//! let client = EntitlementClient::new(config)?;
//!
//! let outcome = fetch_all(&client, &units).await;
//! println!("{} units fetched", outcome.records.len());
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod payload;

pub use client::{fetch_all, EntitlementClient, EntitlementFetcher, FetchFailure, FetchOutcome};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use payload::parse_entitlements;
