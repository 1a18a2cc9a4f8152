use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::merge::SourceCache;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One JSON file per source under `dir`.
///
/// Every access to a source's file happens under that source's lock, and
/// writes land through a temporary file plus rename, so nobody observes a
/// half-written cache.
pub struct CacheStore {
    dir: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache_path(&self, source_key: &str) -> PathBuf {
        self.dir.join(format!("rss_cache_{}.json", source_key))
    }

    fn lock_for(&self, source_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(source_key.to_string()).or_default().clone()
    }

    /// Returns the persisted cache, or an empty one if the source has never
    /// been saved.
    pub async fn load(&self, source_key: &str) -> Result<SourceCache, StoreError> {
        Ok(self.load_existing(source_key).await?.unwrap_or_default())
    }

    /// Like [`CacheStore::load`], but tells a missing file apart from an
    /// empty cache.
    pub async fn load_existing(&self, source_key: &str) -> Result<Option<SourceCache>, StoreError> {
        let lock = self.lock_for(source_key);
        let _guard = lock.lock().await;
        self.read(source_key).await
    }

    pub async fn save(&self, source_key: &str, cache: &SourceCache) -> Result<(), StoreError> {
        let lock = self.lock_for(source_key);
        let _guard = lock.lock().await;
        self.write(source_key, cache).await
    }

    /// Load, mutate and save one source's cache while holding its lock.
    /// Nothing is written if loading fails.
    pub async fn update<F, R>(&self, source_key: &str, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut SourceCache) -> R,
    {
        let lock = self.lock_for(source_key);
        let _guard = lock.lock().await;

        let mut cache = self.read(source_key).await?.unwrap_or_default();
        cache.refresh_sorted_dates();
        let result = mutate(&mut cache);
        self.write(source_key, &cache).await?;
        Ok(result)
    }

    async fn read(&self, source_key: &str) -> Result<Option<SourceCache>, StoreError> {
        let path = self.cache_path(source_key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let cache = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        Ok(Some(cache))
    }

    async fn write(&self, source_key: &str, cache: &SourceCache) -> Result<(), StoreError> {
        let path = self.cache_path(source_key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(cache)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        debug!("Wrote {} bytes to {}", json.len(), path.display());
        Ok(())
    }
}
