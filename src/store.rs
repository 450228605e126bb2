//! Key/value record persistence
//!
//! Positions and subscription records are persisted per mint so the bot can
//! pick up where it left off after a crash or restart.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Record store keyed by mint
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Insert or replace the record for `key`
    async fn put(&self, key: &str, value: &T) -> Result<()>;

    /// Delete the record for `key` (absent keys are fine)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every persisted record
    async fn load_all(&self) -> Result<HashMap<String, T>>;

    /// Delete every record
    async fn clear(&self) -> Result<()>;
}

/// Whole-map JSON file store.
///
/// Every mutation rewrites the file through a temp file + rename, under a
/// mutex so concurrent writers never interleave.
pub struct JsonFileStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<HashMap<String, T>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(HashMap::new());
        }

        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        if data.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&data).map_err(|e| {
            Error::PositionPersistence(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn write_map(&self, map: &HashMap<String, T>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_string_pretty(map)
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        debug!("Saved {} records to {}", map.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn put(&self, key: &str, value: &T) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.clone());
        self.write_map(&map).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<String, T>> {
        let _guard = self.lock.lock().await;
        self.read_map().await
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_map(&HashMap::new()).await
    }
}

/// In-memory store for dry runs and tests
pub struct MemoryStore<T> {
    records: Mutex<HashMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: &str, value: &T) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.lock().await.remove(key);
        Ok(())
    }

    async fn load_all(&self) -> Result<HashMap<String, T>> {
        Ok(self.records.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        status: String,
        price: f64,
    }

    fn record(status: &str) -> Record {
        Record {
            status: status.to_string(),
            price: 0.5,
        }
    }

    #[tokio::test]
    async fn test_json_store_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("positions.json");

        let store: JsonFileStore<Record> = JsonFileStore::new(&path);
        store.put("mint_a", &record("bought")).await.unwrap();
        store.put("mint_b", &record("sold")).await.unwrap();
        store.delete("mint_b").await.unwrap();

        // A fresh store over the same file sees the persisted state
        let reopened: JsonFileStore<Record> = JsonFileStore::new(&path);
        let all = reopened.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["mint_a"], record("bought"));
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Record> = JsonFileStore::new(dir.path().join("none.json"));

        assert!(store.load_all().await.unwrap().is_empty());
        // Deleting from an empty store is not an error
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_json_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFileStore<Record> = JsonFileStore::new(dir.path().join("s.json"));
        store.put("a", &record("x")).await.unwrap();
        store.put("b", &record("y")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store: MemoryStore<Record> = MemoryStore::new();
        store.put("a", &record("x")).await.unwrap();
        store.put("a", &record("y")).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load_all().await.unwrap()["a"].status, "y");
    }
}
