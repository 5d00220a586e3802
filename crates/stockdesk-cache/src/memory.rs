//! In-memory cache store implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;
use stockdesk_core::{
    CacheEntry, CacheStore, Dataset, EntryMeta, Result, ensure_storable,
};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Simple in-memory store for testing and development.
///
/// Entries live in an `RwLock`-protected `HashMap` and are lost when the store
/// is dropped. Datasets are cloned on get/put operations. The write lock is
/// held for the whole of a `put`, so version numbers are assigned in order.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    #[instrument(skip(self), fields(dataset = %name))]
    async fn get(&self, name: &str, as_of: Option<NaiveDate>) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) => {
                debug!(version = entry.meta.version, "Cache hit");
                Ok(Some(entry.clone().as_of(as_of)))
            }
            None => {
                debug!("Cache miss");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, dataset), fields(dataset = %name, rows = dataset.len()))]
    async fn put(
        &self,
        name: &str,
        dataset: &Dataset,
        source_version: Option<&str>,
    ) -> Result<EntryMeta> {
        ensure_storable(name, dataset)?;

        let mut entries = self.entries.write().await;
        let version = entries.get(name).map_or(0, |e| e.meta.version) + 1;
        let meta = EntryMeta::for_dataset(dataset, version, source_version);
        entries.insert(
            name.to_string(),
            CacheEntry {
                meta: meta.clone(),
                dataset: dataset.clone(),
            },
        );
        debug!(version, "Stored dataset");
        Ok(meta)
    }

    async fn metadata(&self, name: &str) -> Result<Option<EntryMeta>> {
        Ok(self.entries.read().await.get(name).map(|e| e.meta.clone()))
    }

    async fn list(&self) -> Result<Vec<EntryMeta>> {
        let mut metas: Vec<EntryMeta> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(name).is_some())
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.meta.is_fresh_at(ttl, now));
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        }

        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        debug!("Cleared all cache entries");
        Ok(())
    }
}
