// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store configuration and its storage port.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Key under which [`StoreConfig`] is persisted.
pub const STORE_CONFIG_KEY: &str = "weft.store";

/// Tunables for an [`crate::Environment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Records removed per collection batch.
    pub gc_step_budget: usize,
    /// Released roots kept counted before their counts drop.
    pub gc_release_buffer_size: usize,
    /// Whether collection runs at all. Counts are tracked either way.
    pub gc_enabled: bool,
    /// Payload field that carries a record's server identity.
    pub identity_field: String,
    /// Selectors whose last `lookup` result is kept for structural sharing.
    pub snapshot_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_step_budget: 250,
            gc_release_buffer_size: 0,
            gc_enabled: true,
            identity_field: "id".to_owned(),
            snapshot_cache_capacity: 64,
        }
    }
}

impl StoreConfig {
    /// Loads the config from `service`, falling back to defaults when absent.
    ///
    /// # Errors
    /// Propagates store and deserialization failures.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        Ok(service.load(STORE_CONFIG_KEY)?.unwrap_or_default())
    }

    /// Persists the config through `service`.
    ///
    /// # Errors
    /// Propagates store and serialization failures.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(STORE_CONFIG_KEY, self)
    }
}

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
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

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Load and deserialize the value for `key`. Returns `Ok(None)` if missing
    /// or empty.
    ///
    /// # Errors
    /// Store failures other than `NotFound`, and malformed JSON.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist the value for `key`.
    ///
    /// # Errors
    /// Serialization or store failures.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}
