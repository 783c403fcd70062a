//! Collection Operations: typed CRUD over a list record plus item records.
//!
//! A collection named by a *list key* (`domain:noun`, e.g.
//! `devices:imprinted`) consists of:
//! - one list record under the list key whose value is the ordered set of
//!   member item keys (insertion order, duplicates forbidden), and
//! - one item record per member under `list_key:item_key`.
//!
//! Writes stamp `created_at` / `updated_at` (RFC 3339) into every record;
//! `created_at` is set once and never overwritten. Writes always go item
//! record first, list record second. The two writes are not atomic: a crash
//! between them can leave an orphaned item or a dangling index entry, which
//! the degraded-read path in [`Collection::find_many`] tolerates.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::store::{Store, StoreRegistry};

/// A decoded collection record: a JSON object, opaque to this layer apart
/// from the timestamp stamps.
pub type Document = Value;

/// Field holding the immutable creation stamp.
pub const CREATED_AT: &str = "created_at";

/// Field refreshed on every write.
pub const UPDATED_AT: &str = "updated_at";

/// Predicate over decoded records, supplied by the domain layer.
///
/// Keeps the collection layer domain-agnostic: callers inject whatever
/// query logic they need instead of the store growing a query language.
pub trait Filter {
    fn matches(&self, record: &Document) -> bool;
}

impl<F: Fn(&Document) -> bool> Filter for F {
    fn matches(&self, record: &Document) -> bool {
        self(record)
    }
}

/// Storage key of the item record for `item_key` within `list_key`.
pub fn item_record_key(list_key: &str, item_key: &str) -> String {
    format!("{list_key}:{item_key}")
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Millisecond timestamp used for recency sorting; unparsable or missing
/// stamps sort as oldest.
fn created_at_millis(record: &Document) -> i64 {
    record
        .get(CREATED_AT)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.timestamp_millis())
        .unwrap_or(i64::MIN)
}

fn into_object(value: Document) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidArgument(
            "record value must be a JSON object".to_string(),
        )),
    }
}

// ============================================================================
// Collection
// ============================================================================

/// CRUD operations for one named collection within one database.
///
/// The collection never pins the engine: the database handle is resolved
/// through the injected [`StoreRegistry`] at the start of each operation
/// and released when the operation returns, so a
/// [`StoreRegistry::close`] followed by a reopen works even while
/// collections on that name are still alive. The handle is shared with
/// every other collection in the same database.
pub struct Collection {
    registry: Arc<StoreRegistry>,
    db_name: String,
    list_key: String,
}

impl Collection {
    /// Bind to the collection under `list_key` in the named database.
    ///
    /// Fails with [`Error::InvalidArgument`] before touching storage when
    /// either identifier is empty. The engine is opened (or found cached)
    /// here, so open failures surface to the caller that triggered them.
    pub fn open(registry: &Arc<StoreRegistry>, db_name: &str, list_key: &str) -> Result<Self> {
        if list_key.is_empty() {
            return Err(Error::InvalidArgument(
                "list key must not be empty".to_string(),
            ));
        }
        registry.open(db_name)?;
        Ok(Self {
            registry: Arc::clone(registry),
            db_name: db_name.to_string(),
            list_key: list_key.to_string(),
        })
    }

    /// Resolve the store handle for one operation; never held past it.
    fn store(&self) -> Result<Arc<Store>> {
        self.registry.open(&self.db_name)
    }

    /// The list key this collection was opened under.
    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    fn require_item_key(item_key: &str) -> Result<()> {
        if item_key.is_empty() {
            return Err(Error::InvalidArgument(
                "item key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the membership index; a missing list reads as empty.
    fn read_list(&self) -> Result<Vec<String>> {
        match self.store()?.get_value::<Vec<String>>(&self.list_key) {
            Ok(keys) => Ok(keys.unwrap_or_default()),
            Err(e) => {
                tracing::error!(key = %self.list_key, error = %e, "[collection] Failed to read list record");
                Err(e)
            }
        }
    }

    fn write_list(&self, keys: &[String]) -> Result<()> {
        self.store()?.put_value(&self.list_key, &keys).map_err(|e| {
            tracing::error!(key = %self.list_key, error = %e, "[collection] Failed to write list record");
            e
        })
    }

    fn write_item(&self, item_key: &str, record: &Document) -> Result<()> {
        let key = item_record_key(&self.list_key, item_key);
        self.store()?.put_value(&key, record).map_err(|e| {
            tracing::error!(key = %key, error = %e, "[collection] Failed to write item record");
            e
        })
    }

    /// Point lookup. `Ok(None)` when the record does not exist; any other
    /// read or decode failure is logged with the offending key and
    /// propagated unchanged.
    pub fn find_one(&self, item_key: &str) -> Result<Option<Document>> {
        Self::require_item_key(item_key)?;
        let key = item_record_key(&self.list_key, item_key);
        match self.store()?.get_value::<Document>(&key) {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "[collection] Failed to read item record");
                Err(e)
            }
        }
    }

    /// List the collection, tolerating individually unreadable items.
    ///
    /// A missing list reads as an empty collection. Members whose item
    /// record is missing are warned about and skipped; members whose item
    /// record fails to read or decode are error-logged and skipped — the
    /// listing itself still succeeds. The optional `filter` is applied to
    /// the surviving records.
    ///
    /// Results are sorted by `created_at` descending (most recent first);
    /// records without a parsable stamp sort oldest.
    pub fn find_many(&self, filter: Option<&dyn Filter>) -> Result<Vec<Document>> {
        let keys = self.read_list()?;
        let store = self.store()?;

        let mut records = Vec::with_capacity(keys.len());
        for item_key in &keys {
            let key = item_record_key(&self.list_key, item_key);
            match store.get_value::<Document>(&key) {
                Ok(Some(record)) => {
                    if filter.map_or(true, |f| f.matches(&record)) {
                        records.push(record);
                    }
                }
                Ok(None) => {
                    tracing::warn!(key = %key, "[collection] Listed item record is missing; skipping");
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "[collection] Failed to read listed item; skipping");
                }
            }
        }

        records.sort_by_key(|record| Reverse(created_at_millis(record)));
        Ok(records)
    }

    /// Create a record, stamping `created_at = updated_at = now`.
    ///
    /// Fails with [`Error::DuplicateKey`] if the key already exists; the
    /// existing record is left untouched.
    pub fn insert_one(&self, item_key: &str, value: Document) -> Result<Document> {
        Self::require_item_key(item_key)?;

        if self.find_one(item_key)?.is_some() {
            return Err(Error::DuplicateKey {
                list_key: self.list_key.clone(),
                item_key: item_key.to_string(),
            });
        }

        let mut keys = self.read_list()?;
        if !keys.iter().any(|k| k == item_key) {
            keys.push(item_key.to_string());
        }

        let now = now_rfc3339();
        let mut record = into_object(value)?;
        record.insert(CREATED_AT.to_string(), Value::String(now.clone()));
        record.insert(UPDATED_AT.to_string(), Value::String(now));
        let record = Value::Object(record);

        self.write_item(item_key, &record)?;
        self.write_list(&keys)?;
        Ok(record)
    }

    /// Upsert with shallow merge: existing fields are overwritten by
    /// `partial` fields, `created_at` is preserved (or stamped now for a
    /// fresh record), and `updated_at` is refreshed.
    ///
    /// The item does not need to pre-exist; the key is appended to the
    /// membership index if absent.
    pub fn update_one(&self, item_key: &str, partial: Document) -> Result<Document> {
        Self::require_item_key(item_key)?;

        let mut keys = self.read_list()?;
        if !keys.iter().any(|k| k == item_key) {
            keys.push(item_key.to_string());
        }

        let existing = self.find_one(item_key)?;
        let now = now_rfc3339();

        let mut merged = match existing {
            Some(Value::Object(map)) => map,
            Some(_) => {
                tracing::warn!(
                    key = %item_record_key(&self.list_key, item_key),
                    "[collection] Existing record is not an object; replacing it"
                );
                Map::new()
            }
            None => Map::new(),
        };
        let created_at = merged
            .get(CREATED_AT)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| now.clone());

        for (field, value) in into_object(partial)? {
            merged.insert(field, value);
        }
        merged.insert(CREATED_AT.to_string(), Value::String(created_at));
        merged.insert(UPDATED_AT.to_string(), Value::String(now));
        let record = Value::Object(merged);

        self.write_item(item_key, &record)?;
        self.write_list(&keys)?;
        Ok(record)
    }

    /// Delete a record and remove its key from the membership index.
    ///
    /// Deleting an absent record is a benign no-op returning `Ok(None)`.
    /// If the list record itself is missing the index was already
    /// inconsistent; the deletion still counts and the record is returned.
    pub fn delete_one(&self, item_key: &str) -> Result<Option<Document>> {
        Self::require_item_key(item_key)?;
        let key = item_record_key(&self.list_key, item_key);

        let Some(record) = self.find_one(item_key)? else {
            tracing::warn!(key = %key, "[collection] Delete requested for missing record");
            return Ok(None);
        };

        let store = self.store()?;
        store.delete_raw(&key).map_err(|e| {
            tracing::error!(key = %key, error = %e, "[collection] Failed to delete item record");
            e
        })?;

        match store.get_value::<Vec<String>>(&self.list_key) {
            Ok(Some(mut keys)) => {
                keys.retain(|k| k != item_key);
                self.write_list(&keys)?;
            }
            Ok(None) => {
                tracing::warn!(key = %self.list_key, "[collection] List record missing during delete; index was already inconsistent");
            }
            Err(e) => {
                tracing::error!(key = %self.list_key, error = %e, "[collection] Failed to read list record during delete");
                return Err(e);
            }
        }

        Ok(Some(record))
    }

    // =========================================================================
    // Deliberate stubs
    //
    // These keep the collection interface shape available for future
    // backends; each fails fast instead of silently degrading.
    // =========================================================================

    pub fn insert_many(&self, _values: Vec<Document>) -> Result<Vec<Document>> {
        Err(Error::NotImplemented("insert_many"))
    }

    pub fn update_many(&self, _filter: Option<&dyn Filter>, _partial: Document) -> Result<u64> {
        Err(Error::NotImplemented("update_many"))
    }

    pub fn delete_many(&self, _filter: Option<&dyn Filter>) -> Result<u64> {
        Err(Error::NotImplemented("delete_many"))
    }

    pub fn count_documents(&self) -> Result<u64> {
        Err(Error::NotImplemented("count_documents"))
    }

    pub fn distinct(&self, _field: &str) -> Result<Vec<Document>> {
        Err(Error::NotImplemented("distinct"))
    }
}
