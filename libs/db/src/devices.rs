//! Device Registry Workflow: reconciles discovered mining devices into the
//! persisted `devices:imprinted` collection and serves lookups over it.
//!
//! Per hardware identity the lifecycle is `Unknown → Imprinted`; the only
//! way back is an explicit [`DeviceRegistry::remove`]. Discovery may
//! re-observe the same identity any number of times, in any order — the
//! reconcile path is insert-or-merge, so overlapping candidate batches are
//! safe.
//!
//! This layer never swallows errors: every failure gets a
//! `[devices]`-prefixed log line and is then propagated unchanged, so
//! operators can tell a reconciliation failure from the storage failure
//! underneath it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{Collection, Document, Filter};
use crate::error::{Error, Result};
use crate::store::StoreRegistry;

/// List key of the imprinted-device collection.
pub const IMPRINTED_LIST_KEY: &str = "devices:imprinted";

/// A candidate produced by a network-discovery scan.
///
/// Candidates arrive with no ordering or deduplication guarantee; the
/// registry dedupes them by hardware identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Hardware identity (MAC-like); the item key within the collection.
    pub mac: String,
    /// Network address, bare (`10.0.0.1`) or with a port (`10.0.0.1:4028`).
    pub address: String,
    /// Vendor/model tag reported by the scan.
    pub model: String,
    /// Declared device name, when the scan resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque telemetry/config blob; stored as-is, never interpreted here.
    #[serde(default)]
    pub payload: Document,
}

/// A device committed to the persisted registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprintedDevice {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Externally-assigned grouping id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub payload: Document,
    /// Set once when the identity was first imprinted.
    #[serde(default)]
    pub created_at: String,
    /// Refreshed on every write.
    #[serde(default)]
    pub updated_at: String,
}

/// Query parameters accepted by [`DeviceRegistry::list_all`].
#[derive(Debug, Clone, Default)]
pub struct DeviceQuery {
    /// Free-text needle matched against address, model, and declared name.
    /// Blank or absent matches everything.
    pub q: Option<String>,
}

fn field_str<'a>(record: &'a Document, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

/// `needle` matches an address when it is the whole address, the bare
/// address of an `address:port` form, or a prefix ending at an octet or
/// port boundary. The boundary rule is what keeps `10.0` matching
/// `10.0.1.5` while `10.0.0.1` never matches `10.0.0.10`.
fn address_matches(address: &str, needle: &str) -> bool {
    if address == needle {
        return true;
    }
    if let Some((host, _port)) = address.split_once(':') {
        if host == needle {
            return true;
        }
    }
    address
        .strip_prefix(needle)
        .and_then(|rest| rest.chars().next())
        .map_or(false, |next| next == '.' || next == ':')
}

/// Case-insensitive match of a lowercased needle against a raw record's
/// address, model tag, and declared name.
fn record_matches(record: &Document, needle: &str) -> bool {
    if let Some(address) = field_str(record, "address") {
        if address_matches(&address.to_lowercase(), needle) {
            return true;
        }
    }
    for field in ["model", "name"] {
        if let Some(value) = field_str(record, field) {
            if value.to_lowercase().contains(needle) {
                return true;
            }
        }
    }
    false
}

fn decode_device(record: Document) -> Result<ImprintedDevice> {
    serde_json::from_value(record).map_err(|e| {
        tracing::error!(error = %e, "[devices] Imprinted record does not decode as a device");
        Error::Record(e)
    })
}

// ============================================================================
// DeviceRegistry
// ============================================================================

/// Domain workflow over the imprinted-device collection.
pub struct DeviceRegistry {
    registry: Arc<StoreRegistry>,
    db_name: String,
}

impl DeviceRegistry {
    /// Bind the workflow to a database name within the injected store
    /// registry. No engine is opened until the first operation.
    pub fn new(registry: Arc<StoreRegistry>, db_name: impl Into<String>) -> Self {
        Self {
            registry,
            db_name: db_name.into(),
        }
    }

    fn collection(&self) -> Result<Collection> {
        Collection::open(&self.registry, &self.db_name, IMPRINTED_LIST_KEY).map_err(|e| {
            tracing::error!(db = %self.db_name, error = %e, "[devices] Failed to open imprinted-device collection");
            e
        })
    }

    /// Insert-or-merge each candidate, keyed by hardware identity.
    ///
    /// A known identity (duplicate insert) falls back to a merge of the
    /// fresh payload, preserving `created_at`. Failures are per-item:
    /// every candidate is attempted even when an earlier one fails, and
    /// the first non-duplicate failure is returned once the batch
    /// completes.
    pub fn reconcile(&self, candidates: &[DiscoveredDevice]) -> Result<Vec<ImprintedDevice>> {
        let collection = self.collection()?;
        let mut imprinted = Vec::with_capacity(candidates.len());
        let mut first_error: Option<Error> = None;

        for candidate in candidates {
            match Self::reconcile_one(&collection, candidate) {
                Ok(device) => imprinted.push(device),
                Err(e) => {
                    tracing::error!(mac = %candidate.mac, error = %e, "[devices] Failed to reconcile candidate");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(imprinted),
        }
    }

    fn reconcile_one(
        collection: &Collection,
        candidate: &DiscoveredDevice,
    ) -> Result<ImprintedDevice> {
        let value = serde_json::to_value(candidate)?;
        let record = match collection.insert_one(&candidate.mac, value.clone()) {
            Ok(record) => {
                tracing::info!(mac = %candidate.mac, address = %candidate.address, "[devices] Imprinted new device");
                record
            }
            Err(Error::DuplicateKey { .. }) => {
                tracing::debug!(mac = %candidate.mac, "[devices] Known identity; merging fresh payload");
                collection.update_one(&candidate.mac, value)?
            }
            Err(e) => return Err(e),
        };
        decode_device(record)
    }

    /// List imprinted devices, optionally filtered by a free-text query.
    ///
    /// A blank or absent `q` matches everything; otherwise see
    /// [`DeviceQuery`] and the address-matching rules on `record_matches`.
    pub fn list_all(&self, query: Option<&DeviceQuery>) -> Result<Vec<ImprintedDevice>> {
        let needle = query
            .and_then(|q| q.q.as_deref())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        let filter = |record: &Document| match &needle {
            Some(needle) => record_matches(record, needle),
            None => true,
        };

        let records = self
            .collection()?
            .find_many(Some(&filter as &dyn Filter))
            .map_err(|e| {
                tracing::error!(error = %e, "[devices] Failed to list imprinted devices");
                e
            })?;
        records.into_iter().map(decode_device).collect()
    }

    /// Devices whose externally-assigned grouping id equals `group_id`.
    /// Devices without a grouping id never match.
    pub fn get_by_group_id(&self, group_id: &str) -> Result<Vec<ImprintedDevice>> {
        let filter = |record: &Document| field_str(record, "group_id") == Some(group_id);

        let records = self
            .collection()?
            .find_many(Some(&filter as &dyn Filter))
            .map_err(|e| {
                tracing::error!(group_id = %group_id, error = %e, "[devices] Failed to list devices by group");
                e
            })?;
        records.into_iter().map(decode_device).collect()
    }

    /// Point lookup by hardware identity. `Ok(None)` when unknown.
    pub fn get(&self, mac: &str) -> Result<Option<ImprintedDevice>> {
        let record = self.collection()?.find_one(mac).map_err(|e| {
            tracing::error!(mac = %mac, error = %e, "[devices] Failed to read device");
            e
        })?;
        record.map(decode_device).transpose()
    }

    /// Merge `fields` into the device record (upsert semantics).
    pub fn patch(&self, mac: &str, fields: Document) -> Result<ImprintedDevice> {
        let record = self.collection()?.update_one(mac, fields).map_err(|e| {
            tracing::error!(mac = %mac, error = %e, "[devices] Failed to patch device");
            e
        })?;
        decode_device(record)
    }

    /// Explicitly delete a device from the registry. Removing an unknown
    /// identity is a benign no-op returning `Ok(None)`.
    pub fn remove(&self, mac: &str) -> Result<Option<ImprintedDevice>> {
        let record = self.collection()?.delete_one(mac).map_err(|e| {
            tracing::error!(mac = %mac, error = %e, "[devices] Failed to remove device");
            e
        })?;
        record.map(decode_device).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_matching_is_boundary_aware() {
        // Exact and bare-address-of-port forms.
        assert!(address_matches("10.0.0.1", "10.0.0.1"));
        assert!(address_matches("10.0.0.1:4028", "10.0.0.1"));

        // Prefixes only match at an octet or port boundary.
        assert!(address_matches("10.0.1.5", "10.0"));
        assert!(address_matches("10.0.0.10", "10.0"));
        assert!(!address_matches("10.0.0.10", "10.0.0.1"));

        assert!(!address_matches("192.168.1.1", "10.0"));
    }

    #[test]
    fn record_matching_covers_model_and_name() {
        let record = json!({
            "mac": "aa:bb:cc",
            "address": "10.0.0.1:4028",
            "model": "Antminer S19",
            "name": "rack-3-unit-7",
        });

        assert!(record_matches(&record, "antminer"));
        assert!(record_matches(&record, "rack-3"));
        assert!(record_matches(&record, "10.0.0.1"));
        assert!(!record_matches(&record, "whatsminer"));
        assert!(!record_matches(&record, "10.0.0.10"));
    }

    #[test]
    fn records_without_string_fields_never_match() {
        let record = json!({ "mac": "aa", "address": 42 });
        assert!(!record_matches(&record, "42"));
    }

    #[test]
    fn imprinted_device_decodes_from_sparse_record() {
        let device = decode_device(json!({
            "mac": "aa:bb:cc",
            "address": "10.0.0.1",
        }))
        .unwrap();
        assert_eq!(device.mac, "aa:bb:cc");
        assert_eq!(device.model, "");
        assert!(device.group_id.is_none());
        assert!(device.payload.is_null());
    }
}
