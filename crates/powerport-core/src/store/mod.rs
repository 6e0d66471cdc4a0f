//! State store: opaque string keys mapped to JSON values.
//!
//! The backend ([`KvStore`]) only knows get/set/delete. [`Store`] layers
//! typed access on top and serializes read-modify-write cycles per key,
//! since the backends offer no transactions across keys.
//!
//! Key layout:
//! - `users`, `apiKeys`, `images`, `nodes`: global lists
//! - `{id}_node`: node record
//! - `instances`: global instance list
//! - `{userId}_instances`: per-user instance list
//! - `{Id}_instance`: per-instance record

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Storage backend contract.
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check that the backend is reachable.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub mod keys {
    pub const USERS: &str = "users";
    pub const API_KEYS: &str = "apiKeys";
    pub const IMAGES: &str = "images";
    pub const NODES: &str = "nodes";
    pub const INSTANCES: &str = "instances";
    pub const PANEL: &str = "PowerPort_instance";

    pub fn node(id: &str) -> String {
        format!("{id}_node")
    }

    pub fn instance(id: &str) -> String {
        format!("{id}_instance")
    }

    pub fn user_instances(user_id: &str) -> String {
        format!("{user_id}_instances")
    }
}

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Typed store with per-key write serialization.
///
/// A key's lock lives in the map only while someone holds or waits for it.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KvStore>,
    locks: Arc<Mutex<LockMap>>,
}

impl Store {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store backed by a fresh [`MemoryKv`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    pub fn ping(&self) -> Result<()> {
        self.backend.ping()
    }

    /// Read and deserialize a value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Read a list, treating an absent key as empty
    pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        Ok(self.get::<Vec<T>>(key)?.unwrap_or_default())
    }

    /// Serialize and write a value under the key's lock
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let _guard = self.lock(key).await?;
        self.backend.set(key, &serde_json::to_value(value)?)
    }

    /// Delete a key under its lock
    pub async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock(key).await?;
        self.backend.delete(key)
    }

    /// Read-modify-write. An absent key starts from `T::default()`.
    ///
    /// Concurrent updates of the same key are applied one after another;
    /// updates of different keys never wait on each other.
    pub async fn update<T, R, F>(&self, key: &str, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock(key).await?;
        let mut value: T = self.get(key)?.unwrap_or_default();
        let out = f(&mut value);
        self.backend.set(key, &serde_json::to_value(&value)?)?;
        Ok(out)
    }

    /// Read-modify-write of an existing value. Returns `None` (and writes
    /// nothing) when the key is absent.
    pub async fn update_existing<T, R, F>(&self, key: &str, f: F) -> Result<Option<R>>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut T) -> R,
    {
        let _guard = self.lock(key).await?;
        let Some(mut value) = self.get::<T>(key)? else {
            return Ok(None);
        };
        let out = f(&mut value);
        self.backend.set(key, &serde_json::to_value(&value)?)?;
        Ok(Some(out))
    }

    /// Acquire the write lock for a key.
    async fn lock(&self, key: &str) -> Result<KeyGuard> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| Error::LockPoisoned)?;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        Ok(KeyGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.locks),
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }
}

/// Held key lock; drops the map entry once nobody else references it.
struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
    key: String,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // The owned guard keeps its own reference to the mutex.
        drop(self.guard.take());
        if let Ok(mut locks) = self.locks.lock() {
            if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&self.key);
            }
        }
    }
}
