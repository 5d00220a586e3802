//! File-per-dataset cache store.
//!
//! Each dataset lives in `{root}/{name}.json`, a JSON document holding the
//! entry metadata and the dataset. Writes go to a temporary file in the same
//! directory which is flushed and then renamed over the published entry, so a
//! reader sees either the old document or the new one.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stockdesk_core::{
    CacheEntry, CacheStore, Dataset, DeskError, EntryMeta, Result, ensure_storable,
};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const EXTENSION: &str = "json";

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    meta: &'a EntryMeta,
    dataset: &'a Dataset,
}

#[derive(Deserialize)]
struct Envelope {
    meta: EntryMeta,
    dataset: Dataset,
}

#[derive(Deserialize)]
struct MetaOnly {
    meta: EntryMeta,
}

/// Durable on-disk store, one JSON document per dataset.
///
/// Writers to the same dataset name are serialized by a per-name async mutex.
/// Readers take no lock.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns [`DeskError::StorageFailure`] if the directory cannot be created.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| DeskError::storage(root.display().to_string(), e))?;
        debug!(root = %root.display(), "File store opened");
        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(DeskError::InvalidParameter(format!(
                "dataset name {name:?} cannot be used as a file name"
            )));
        }
        Ok(self.root.join(format!("{name}.{EXTENSION}")))
    }

    async fn writer_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        Arc::clone(writers.entry(name.to_string()).or_default())
    }

    async fn read_meta(&self, name: &str) -> Result<Option<EntryMeta>> {
        let path = self.path_for(name)?;
        let Some(bytes) = read_file(name, path).await? else {
            return Ok(None);
        };
        let doc: MetaOnly = serde_json::from_slice(&bytes)
            .map_err(|e| DeskError::storage(name, format!("corrupt entry: {e}")))?;
        Ok(Some(doc.meta))
    }

    async fn names(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        let listing = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
        .map_err(|e| DeskError::storage("*", e))?;
        listing.map_err(|e| DeskError::storage("*", e))
    }
}

async fn read_file(name: &str, path: PathBuf) -> Result<Option<Vec<u8>>> {
    let read = tokio::task::spawn_blocking(move || std::fs::read(path))
        .await
        .map_err(|e| DeskError::storage(name, e))?;
    match read {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DeskError::storage(name, e)),
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CacheStore for FileStore {
    #[instrument(skip(self), fields(dataset = %name))]
    async fn get(&self, name: &str, as_of: Option<NaiveDate>) -> Result<Option<CacheEntry>> {
        let path = self.path_for(name)?;
        let Some(bytes) = read_file(name, path).await? else {
            debug!("Cache miss");
            return Ok(None);
        };

        let doc: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| DeskError::storage(name, format!("corrupt entry: {e}")))?;
        let entry = CacheEntry {
            meta: doc.meta,
            dataset: doc.dataset,
        };
        if entry.meta.name != name || entry.dataset.name() != name {
            return Err(DeskError::storage(
                name,
                format!("entry file holds dataset {}", entry.meta.name),
            ));
        }
        entry.verify()?;

        debug!(version = entry.meta.version, rows = entry.meta.rows, "Cache hit");
        Ok(Some(entry.as_of(as_of)))
    }

    #[instrument(skip(self, dataset), fields(dataset = %name, rows = dataset.len()))]
    async fn put(
        &self,
        name: &str,
        dataset: &Dataset,
        source_version: Option<&str>,
    ) -> Result<EntryMeta> {
        ensure_storable(name, dataset)?;
        let target = self.path_for(name)?;

        let lock = self.writer_lock(name).await;
        let _guard = lock.lock().await;

        // An unreadable previous entry is overwritten, not fatal.
        let previous = match self.read_meta(name).await {
            Ok(meta) => meta.map_or(0, |m| m.version),
            Err(e) => {
                warn!(error = %e, "Replacing unreadable cache entry");
                0
            }
        };
        let meta = EntryMeta::for_dataset(dataset, previous + 1, source_version);
        let bytes = serde_json::to_vec(&EnvelopeRef {
            meta: &meta,
            dataset,
        })
        .map_err(|e| DeskError::storage(name, e))?;

        let dir = self.root.clone();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes))
            .await
            .map_err(|e| DeskError::storage(name, e))?
            .map_err(|e| DeskError::storage(name, e))?;

        debug!(version = meta.version, "Stored dataset");
        Ok(meta)
    }

    async fn metadata(&self, name: &str) -> Result<Option<EntryMeta>> {
        self.read_meta(name).await
    }

    async fn list(&self) -> Result<Vec<EntryMeta>> {
        let mut metas = Vec::new();
        for name in self.names().await? {
            match self.read_meta(&name).await {
                Ok(Some(meta)) => metas.push(meta),
                Ok(None) => {}
                Err(e) => warn!(dataset = %name, error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(metas)
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        let lock = self.writer_lock(name).await;
        let _guard = lock.lock().await;

        let removed = tokio::task::spawn_blocking(move || std::fs::remove_file(path))
            .await
            .map_err(|e| DeskError::storage(name, e))?;
        match removed {
            Ok(()) => {
                debug!("Removed cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeskError::storage(name, e)),
        }
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0usize;
        for meta in self.list().await? {
            if !meta.is_fresh_at(ttl, now) && self.remove(&meta.name).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Invalidated {} stale cache entries", removed);
        }

        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        for name in self.names().await? {
            self.remove(&name).await?;
        }
        debug!("Cleared all cache entries");
        Ok(())
    }
}
