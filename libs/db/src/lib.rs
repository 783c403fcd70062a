//! Persistence and reconciliation layer for a fleet of network-attached
//! mining devices.
//!
//! ## Module Structure
//!
//! - `store` - Store Handle Registry: one RocksDB handle per database name,
//!   lazily opened, cached, closed exactly once at shutdown
//! - `collection` - Collection Operations: CRUD over a membership list plus
//!   per-item records, with degraded-read tolerant listing
//! - `devices` - Device Registry Workflow: reconcile discovered candidates
//!   into the imprinted registry and serve flexible lookups
//! - `error` - Error taxonomy shared by all layers
//!
//! Data flow: discovery scan → [`DeviceRegistry`] → [`Collection`] →
//! [`StoreRegistry`] → RocksDB. The HTTP/API and telemetry layers consume
//! the workflow's outputs; they live outside this crate.

pub mod collection;
pub mod devices;
pub mod error;
pub mod store;

pub use collection::{item_record_key, Collection, Document, Filter, CREATED_AT, UPDATED_AT};
pub use devices::{
    DeviceQuery, DeviceRegistry, DiscoveredDevice, ImprintedDevice, IMPRINTED_LIST_KEY,
};
pub use error::{Error, Result};
pub use store::{Store, StoreOptions, StoreRegistry};
