// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quill_app_core::config::{ConfigError, ConfigStore};

/// In-memory [`ConfigStore`] that counts calls and can be told to fail.
///
/// Clones share state, so a test can hand one clone to a
/// [`ConfigService`](quill_app_core::config::ConfigService) and inspect the other.
///
/// ```
/// use quill_dry_tests::InMemoryConfigStore;
/// use quill_app_core::config::ConfigService;
/// use quill_app_core::prefs::HostPrefs;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// service.save_doc(&HostPrefs::default()).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key("host_prefs"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with raw blobs.
    pub fn with_data(data: HashMap<String, Vec<u8>>) -> Self {
        let store = Self::new();
        store.lock().data = data;
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `load_raw` fail (or stop failing).
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make every `save_raw` fail (or stop failing).
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Whether `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Raw blob under `key`, parsed as JSON.
    pub fn json(&self, key: &str) -> Option<serde_json::Value> {
        self.lock()
            .data
            .get(key)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quill_app_core::config::ConfigService;
    use quill_app_core::prefs::ClientPrefs;

    #[test]
    fn clones_share_state() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("k", b"{}").unwrap();
        assert!(b.contains_key("k"));
        assert_eq!(b.save_count(), 1);
    }

    #[test]
    fn failed_save_counts_but_stores_nothing() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(store.save_raw("k", b"{}").is_err());
        assert_eq!(store.save_count(), 1);
        assert!(!store.contains_key("k"));
    }

    #[test]
    fn load_failure_surfaces_through_the_service() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        service.save_doc(&ClientPrefs::default()).unwrap();
        store.set_fail_on_load(true);
        assert!(matches!(
            service.load_doc::<ClientPrefs>(),
            Err(ConfigError::Other(_))
        ));
        store.set_fail_on_load(false);
        assert_eq!(service.load_doc::<ClientPrefs>().unwrap(), ClientPrefs::default());
        assert_eq!(store.json("client_prefs").unwrap()["call_timeout_ms"], 5000);
    }
}
