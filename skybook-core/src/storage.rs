use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{CoreError, CoreResult};

/// String-keyed persisted storage surface.
///
/// Writes are whole-value replacements; there is no partial patching.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    fn remove(&self, key: &str) -> CoreResult<()>;

    /// All keys currently held by this store.
    fn keys(&self) -> CoreResult<Vec<String>>;

    fn clear(&self) -> CoreResult<()> {
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }
}

/// Read a JSON document stored under `key`.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> CoreResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Replace the JSON document stored under `key`.
pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> CoreResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// In-process store, used for tests and for deployments without Redis.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::StorageError("empty storage key".to_string()));
        }
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> CoreResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn clear(&self) -> CoreResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// The two storage scopes a booking context works against.
///
/// `tab` holds per-tab auth and scratch state and is wiped on reset;
/// `durable` survives reloads and holds the booking snapshot and the
/// `current_booking_id` pointer.
#[derive(Clone)]
pub struct SessionStorage {
    pub tab: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
}

impl SessionStorage {
    pub fn new(tab: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { tab, durable }
    }

    pub fn in_memory() -> Self {
        Self {
            tab: Arc::new(MemoryStore::new()),
            durable: Arc::new(MemoryStore::new()),
        }
    }
}
