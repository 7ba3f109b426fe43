// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config port: raw blob storage behind a trait, JSON on top.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage for raw config blobs, keyed by logical name.
pub trait ConfigStore {
    /// Load the blob stored under `key`. Returns [`ConfigError::NotFound`] when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist `data` under `key`, replacing any previous blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in the store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A decoded value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Anything else.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and hands the bytes to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the service and return the store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and decode the value under `key`. `Ok(None)` when missing or empty.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Encode `value` as pretty JSON and store it under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Load `key`, or persist and return `T::default()` when nothing is stored.
    ///
    /// A failure to persist the default is not an error; the default is
    /// returned either way.
    pub fn load_or_init<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.load(key)? {
            return Ok(value);
        }
        let value = T::default();
        let _ = self.save(key, &value);
        Ok(value)
    }
}
