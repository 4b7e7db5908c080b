// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// A serializable document with a fixed storage key.
pub trait ConfigDoc: Serialize + DeserializeOwned + Default {
    /// Logical key the document is stored under.
    const KEY: &'static str;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the inner store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Load and deserialize the value for `key`. Missing or empty blobs are `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Serialize and persist `value` under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Load a [`ConfigDoc`], falling back to its default when absent.
    pub fn load_doc<D: ConfigDoc>(&self) -> Result<D, ConfigError> {
        Ok(self.load(D::KEY)?.unwrap_or_default())
    }

    /// Persist a [`ConfigDoc`] under its key.
    pub fn save_doc<D: ConfigDoc>(&self, doc: &D) -> Result<(), ConfigError> {
        self.save(D::KEY, doc)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore(RefCell<HashMap<String, Vec<u8>>>);

    impl ConfigStore for MapStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0.borrow().get(key).cloned().ok_or(ConfigError::NotFound)
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.to_string(), data.to_vec());
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        n: u32,
    }

    impl ConfigDoc for Doc {
        const KEY: &'static str = "doc";
    }

    #[test]
    fn missing_doc_loads_default() {
        let service = ConfigService::new(MapStore::default());
        assert_eq!(service.load_doc::<Doc>().unwrap(), Doc::default());
    }

    #[test]
    fn empty_blob_is_absent() {
        let service = ConfigService::new(MapStore::default());
        service.store().save_raw("doc", b"").unwrap();
        assert_eq!(service.load::<Doc>("doc").unwrap(), None);
    }

    #[test]
    fn saved_doc_is_read_back() {
        let service = ConfigService::new(MapStore::default());
        service.save_doc(&Doc { n: 7 }).unwrap();
        assert_eq!(service.load_doc::<Doc>().unwrap(), Doc { n: 7 });
    }

    #[test]
    fn corrupt_blob_is_a_serde_error() {
        let service = ConfigService::new(MapStore::default());
        service.store().save_raw("doc", b"{not json").unwrap();
        assert!(matches!(service.load_doc::<Doc>(), Err(ConfigError::Serde(_))));
    }
}
