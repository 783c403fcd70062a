//! Error taxonomy shared by the store, collection, and devices layers.
//!
//! "Not found" is deliberately absent: reads surface legitimate absence as
//! `Ok(None)` or an empty `Vec`, never as an error. Everything here is a
//! genuine validation or I/O failure that callers must handle.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A required identifier (database name, list key, item key) was empty.
    /// Raised before any engine I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `insert_one` was called for an item key that already exists.
    ///
    /// The device workflow matches on this variant to switch from the
    /// insert path to the update path during reconciliation.
    #[error("duplicate item key '{item_key}' in collection '{list_key}'")]
    DuplicateKey { list_key: String, item_key: String },

    /// The named collection operation is a deliberate stub.
    #[error("operation '{0}' is not implemented")]
    NotImplemented(&'static str),

    /// Engine-level failure (I/O, corruption, permission).
    #[error("storage engine error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// A value could not be encoded for storage.
    #[error("value encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Stored bytes could not be decoded back into a value.
    #[error("value decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A decoded record did not fit the expected domain shape.
    #[error("record does not match the expected shape: {0}")]
    Record(#[from] serde_json::Error),
}

impl Error {
    /// True for the duplicate-identity signal raised by `insert_one`.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_is_detectable() {
        let err = Error::DuplicateKey {
            list_key: "devices:imprinted".to_string(),
            item_key: "aa:bb:cc".to_string(),
        };
        assert!(err.is_duplicate());
        assert!(!Error::NotImplemented("insert_many").is_duplicate());
    }

    #[test]
    fn messages_name_the_offender() {
        let err = Error::DuplicateKey {
            list_key: "devices:imprinted".to_string(),
            item_key: "aa:bb:cc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("aa:bb:cc"));
        assert!(msg.contains("devices:imprinted"));

        let msg = Error::NotImplemented("count_documents").to_string();
        assert!(msg.contains("count_documents"));
    }
}
