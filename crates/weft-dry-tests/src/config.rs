// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use weft_core::{ConfigError, ConfigStore};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state, so a test can hand one clone to a
/// [`weft_core::ConfigService`] and inspect the other.
///
/// # Example
///
/// ```
/// use weft_core::{ConfigService, StoreConfig};
/// use weft_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// StoreConfig::default().save(&service).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert_eq!(StoreConfig::load(&service).unwrap(), StoreConfig::default());
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<InMemoryConfigStoreInner>>,
}

#[derive(Default)]
struct InMemoryConfigStoreInner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `json` under `key`.
    pub fn with_json(key: &str, json: &str) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_owned(), json.as_bytes().to_vec());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryConfigStoreInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
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
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use weft_core::config::STORE_CONFIG_KEY;
    use weft_core::{ConfigService, StoreConfig};

    use super::*;

    #[test]
    fn missing_config_loads_defaults() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        assert_eq!(StoreConfig::load(&service).unwrap(), StoreConfig::default());
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn stored_overrides_merge_with_defaults() {
        let store =
            InMemoryConfigStore::with_json(STORE_CONFIG_KEY, r#"{"gc_step_budget": 5, "gc_enabled": false}"#);
        let config = StoreConfig::load(&ConfigService::new(store)).unwrap();
        assert_eq!(config.gc_step_budget, 5);
        assert!(!config.gc_enabled);
        assert_eq!(config.snapshot_cache_capacity, 64);
    }

    #[test]
    fn load_failures_propagate() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_load(true);
        let result = StoreConfig::load(&ConfigService::new(store));
        assert!(matches!(result, Err(ConfigError::Other(_))));
    }

    #[test]
    fn malformed_json_is_a_serde_error() {
        let store = InMemoryConfigStore::with_json(STORE_CONFIG_KEY, "{not json");
        let result = StoreConfig::load(&ConfigService::new(store));
        assert!(matches!(result, Err(ConfigError::Serde(_))));
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        let config = StoreConfig {
            identity_field: "uuid".into(),
            ..StoreConfig::default()
        };
        config.save(&service).unwrap();
        assert!(store.contains_key(STORE_CONFIG_KEY));
        assert_eq!(StoreConfig::load(&service).unwrap(), config);
    }
}
