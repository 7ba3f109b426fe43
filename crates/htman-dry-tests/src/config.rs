// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use htman_app_core::config::{ConfigError, ConfigStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory [`ConfigStore`] that counts calls and can be told to fail.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the code under test.
///
/// ```
/// use htman_app_core::config::ConfigService;
/// use htman_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// service.save("runtime", &vec![1, 2, 3]).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key("runtime"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
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

    /// Store pre-populated with `(key, blob)` pairs.
    pub fn with_data<K, V>(data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new();
        store.lock().data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `load_raw` fail with [`ConfigError::Other`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make every `save_raw` fail with [`ConfigError::Other`].
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

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().data.keys().cloned().collect()
    }

    /// True when `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Stored blob decoded as UTF-8, for asserting on JSON text.
    pub fn text(&self, key: &str) -> Option<String> {
        self.lock()
            .data
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
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
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counts_attempts_including_failures() {
        let store = InMemoryConfigStore::new();
        store.save_raw("a", b"1").unwrap();
        store.set_fail_on_save(true);
        assert!(store.save_raw("b", b"2").is_err());
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.keys(), vec!["a".to_owned()]);

        store.set_fail_on_load(true);
        assert!(matches!(store.load_raw("a"), Err(ConfigError::Other(_))));
        store.set_fail_on_load(false);
        assert!(matches!(store.load_raw("zz"), Err(ConfigError::NotFound)));
        assert_eq!(store.load_count(), 2);
    }

    #[test]
    fn clones_share_state() {
        let store = InMemoryConfigStore::with_data([("runtime", b"{}".to_vec())]);
        let other = store.clone();
        other.save_raw("extra", b"x").unwrap();
        assert!(store.contains_key("extra"));
        assert_eq!(store.text("runtime").as_deref(), Some("{}"));
    }
}
