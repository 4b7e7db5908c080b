// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistence port for the routers, plus the in-memory implementation.
//!
//! Records are JSON objects with a string `id` assigned by the store. The
//! routers validate every input before it reaches the store, so the store only
//! enforces what it owns: ids, existence, and availability.

use std::collections::BTreeMap;
use std::sync::Mutex;

use quill_registry_api::error::{REMOTE_DATABASE, REMOTE_MISSING_RECORD};
use quill_registry_api::CallError;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::settings::AuthSettings;

/// Errors raised by a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing database could not be reached or refused the write.
    #[error("database unavailable: {0}")]
    Unavailable(String),
    /// No record with that id in the collection.
    #[error("no record {id} in {collection}")]
    MissingRecord {
        /// Collection name.
        collection: String,
        /// Requested id.
        id: String,
    },
    /// The record is not a JSON object.
    #[error("records must be objects")]
    NotAnObject,
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => CallError::remote(REMOTE_DATABASE, err.to_string()),
            StoreError::MissingRecord { .. } => {
                CallError::remote(REMOTE_MISSING_RECORD, err.to_string())
            }
            StoreError::NotAnObject => CallError::invalid_field("$", err.to_string()),
        }
    }
}

/// Persistence collaborator used by every procedure group.
pub trait Store: Send + Sync {
    /// Every record of `collection`, in id order.
    fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// One record, or `None` when absent. Absence is not an error.
    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Insert `record`, assigning a fresh id. Returns the stored record.
    fn insert(&self, collection: &str, record: Value) -> Result<Value, StoreError>;

    /// Merge `patch` into an existing record. Returns the updated record.
    fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError>;

    /// Remove a record. Returns `false` when it did not exist.
    fn remove(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Current social-auth settings.
    fn auth_settings(&self) -> Result<AuthSettings, StoreError>;

    /// Replace the social-auth settings.
    fn save_auth_settings(&self, settings: &AuthSettings) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    settings: AuthSettings,
    next_id: u64,
    outage: Option<String>,
}

impl MemoryState {
    fn available(&self) -> Result<(), StoreError> {
        match &self.outage {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory [`Store`].
///
/// Ids are `"{collection}-{n}"` with a store-wide counter, so ids never repeat
/// even across collections. [`MemoryStore::set_outage`] makes every operation
/// fail with [`StoreError::Unavailable`] until cleared.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Empty store with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `settings`.
    pub fn with_settings(settings: AuthSettings) -> Self {
        let store = Self::new();
        store.lock().settings = settings;
        store
    }

    /// Simulate (or end) a database outage.
    pub fn set_outage(&self, reason: Option<&str>) {
        self.lock().outage = reason.map(str::to_string);
    }

    /// Number of records in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let state = self.lock();
        state.available()?;
        Ok(state
            .collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let state = self.lock();
        state.available()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    fn insert(&self, collection: &str, record: Value) -> Result<Value, StoreError> {
        let Value::Object(mut fields) = record else {
            return Err(StoreError::NotAnObject);
        };
        let mut state = self.lock();
        state.available()?;
        state.next_id += 1;
        let id = format!("{collection}-{}", state.next_id);
        fields.insert("id".to_string(), Value::String(id.clone()));
        let stored = Value::Object(fields);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, stored.clone());
        Ok(stored)
    }

    fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::NotAnObject);
        };
        let mut state = self.lock();
        state.available()?;
        let record = state
            .collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(id))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| StoreError::MissingRecord {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        merge(record, patch);
        Ok(Value::Object(record.clone()))
    }

    fn remove(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.available()?;
        Ok(state
            .collections
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .is_some())
    }

    fn auth_settings(&self) -> Result<AuthSettings, StoreError> {
        let state = self.lock();
        state.available()?;
        Ok(state.settings.clone())
    }

    fn save_auth_settings(&self, settings: &AuthSettings) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.available()?;
        state.settings = settings.clone();
        Ok(())
    }
}

// `null` in a patch clears the field; the id is never overwritten.
fn merge(record: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if key == "id" {
            continue;
        }
        if value.is_null() {
            record.remove(&key);
        } else {
            record.insert(key, value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_assigns_unique_ids() {
        let store = MemoryStore::new();
        let a = store.insert("products", json!({"name": "A"})).unwrap();
        let b = store.insert("blog", json!({"title": "B"})).unwrap();
        assert_eq!(a["id"], "products-1");
        assert_eq!(b["id"], "blog-2");
        assert_eq!(store.count("products"), 1);
    }

    #[test]
    fn update_merges_and_clears() {
        let store = MemoryStore::new();
        let rec = store
            .insert("products", json!({"name": "A", "description": "old"}))
            .unwrap();
        let id = rec["id"].as_str().unwrap();
        let updated = store
            .update("products", id, json!({"description": null, "price": 3, "id": "x"}))
            .unwrap();
        assert_eq!(updated, json!({"id": id, "name": "A", "price": 3}));
    }

    #[test]
    fn update_of_missing_record_fails() {
        let store = MemoryStore::new();
        let err = store.update("products", "nope", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::MissingRecord { .. }));
    }

    #[test]
    fn outage_fails_everything_until_cleared() {
        let store = MemoryStore::new();
        store.set_outage(Some("connection refused"));
        assert!(matches!(store.list("products"), Err(StoreError::Unavailable(_))));
        let err: CallError = store.auth_settings().unwrap_err().into();
        assert!(matches!(err, CallError::Remote { ref code, .. } if code == REMOTE_DATABASE));
        store.set_outage(None);
        assert!(store.list("products").unwrap().is_empty());
    }
}
