use parking_lot::Mutex;
use redis::Commands;
use skybook_core::{CoreError, CoreResult, KeyValueStore, SessionStorage};
use std::sync::Arc;
use tracing::debug;

use crate::app_config::RedisConfig;
use crate::StoreError;

const SCAN_BATCH: usize = 100;

/// Key-value storage on Redis, one namespace per scope.
///
/// Keys are stored as `{namespace}:{key}`; `keys()` and `clear()` only see
/// the store's own namespace. Calls block, so async callers run them on the
/// blocking pool. Scoped stores share one connection, reopened after a
/// connection-level failure.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    connection: Arc<Mutex<Option<redis::Connection>>>,
    namespace: String,
}

impl RedisStore {
    pub fn new(connection_string: &str, namespace: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(None)),
            namespace: namespace.trim_end_matches(':').to_string(),
        })
    }

    /// A store sharing this connection under a narrower namespace.
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            client: self.client.clone(),
            connection: self.connection.clone(),
            namespace: format!("{}:{}", self.namespace, scope),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.namespace))
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>) -> CoreResult<T> {
        let mut slot = self.connection.lock();
        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => {
                debug!("Opening redis connection for {}", self.namespace);
                slot.insert(self.client.get_connection().map_err(storage_error)?)
            }
        };
        op(conn).map_err(|e| {
            if e.is_io_error() || e.is_connection_dropped() {
                *slot = None;
            }
            storage_error(e)
        })
    }
}

/// Redis glob metacharacters in a namespace match literally.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Where booking sessions live: Redis when a URL is configured, process
/// memory otherwise. Every subject shares the one Redis connection.
#[derive(Clone, Default)]
pub struct SessionStores {
    root: Option<RedisStore>,
}

impl SessionStores {
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let root = config
            .url
            .as_deref()
            .map(|url| RedisStore::new(url, &config.namespace))
            .transpose()?;
        Ok(Self { root })
    }

    /// Tab and durable stores for one subject.
    pub fn for_subject(&self, subject: &str) -> SessionStorage {
        match &self.root {
            Some(root) => SessionStorage::new(
                Arc::new(root.scoped(&format!("tab:{}", subject))),
                Arc::new(root.scoped(&format!("durable:{}", subject))),
            ),
            None => SessionStorage::in_memory(),
        }
    }
}

fn storage_error(e: redis::RedisError) -> CoreError {
    CoreError::StorageError(format!("redis: {}", e))
}

impl KeyValueStore for RedisStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let key = self.key(key);
        self.with_connection(|conn| conn.get(key))
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::StorageError("empty storage key".to_string()));
        }
        let full = self.key(key);
        self.with_connection(|conn| conn.set::<_, _, ()>(&full, value))?;
        debug!("Stored {} ({} bytes)", full, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        let key = self.key(key);
        self.with_connection(|conn| conn.del::<_, ()>(key))
    }

    /// Walks the namespace with SCAN so a large keyspace never blocks the server.
    fn keys(&self) -> CoreResult<Vec<String>> {
        let prefix = format!("{}:", self.namespace);
        let pattern = self.pattern();
        let full = self.with_connection(|conn| {
            let mut cursor: u64 = 0;
            let mut found = Vec::new();
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query(conn)?;
                found.extend(batch);
                if next == 0 {
                    return Ok(found);
                }
                cursor = next;
            }
        })?;

        let mut keys: Vec<String> = full
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespacing() {
        let store = RedisStore::new("redis://127.0.0.1/", "skybook:").unwrap();
        assert_eq!(store.namespace(), "skybook");
        let tab = store.scoped("tab:alice");
        assert_eq!(tab.key("token"), "skybook:tab:alice:token");
        assert!(Arc::ptr_eq(&store.connection, &tab.connection));
    }

    #[test]
    fn test_subjects_share_one_connection() {
        let config = RedisConfig {
            url: Some("redis://127.0.0.1/".to_string()),
            ..RedisConfig::default()
        };
        let stores = SessionStores::new(&config).unwrap();
        let root = stores.root.as_ref().unwrap();
        let alice = root.scoped("durable:alice");
        let bob = root.scoped("durable:bob");
        assert!(Arc::ptr_eq(&alice.connection, &bob.connection));
        assert_ne!(alice.namespace(), bob.namespace());
    }

    #[test]
    fn test_scan_pattern_stays_in_namespace() {
        let store = RedisStore::new("redis://127.0.0.1/", "skybook").unwrap();
        assert_eq!(store.scoped("durable:bob").pattern(), "skybook:durable:bob:*");
        assert_eq!(store.scoped("tab:a*b").pattern(), "skybook:tab:a\\*b:*");
    }

    #[test]
    fn test_unreachable_server_is_a_storage_error() {
        let store = RedisStore::new("redis://127.0.0.1:1/", "skybook").unwrap();
        let err = store.get("booking-store").unwrap_err();
        assert!(matches!(err, CoreError::StorageError(_)));
        assert!(store.connection.lock().is_none());
    }

    #[test]
    fn test_memory_storage_without_url() {
        let storage = SessionStores::new(&RedisConfig::default()).unwrap().for_subject("alice");
        storage.durable.set("booking-store", "{}").unwrap();
        assert!(storage.tab.get("booking-store").unwrap().is_none());
    }
}
