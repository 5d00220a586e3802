//! SQLite-based cache store implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use stockdesk_core::{
    CacheEntry, CacheStore, Dataset, DeskError, EntryMeta, Result, ensure_storable,
};
use tracing::{debug, instrument};

/// SQLite-based store for datasets.
///
/// Each dataset is one row holding its metadata and JSON payload. A `put`
/// replaces the row inside a transaction, so readers see either the previous
/// or the new entry. The connection mutex serializes writers.
///
/// A file-backed store runs in WAL mode and opens a read-only connection per
/// read, so readers never wait for the writer. An in-memory store has a
/// single connection that readers share with the writer.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

fn sql_err(e: impl ToString) -> DeskError {
    DeskError::storage("sqlite", e)
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(sql_err)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(sql_err)?;
        debug!(path = %path.display(), journal_mode = %mode, "SQLite store opened");
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(sql_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS datasets (
                name TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                fetched_at TEXT NOT NULL,
                meta_json TEXT NOT NULL,
                data_json TEXT NOT NULL
            )",
            [],
        )
        .map_err(sql_err)?;

        debug!("SQLite store schema initialized");
        Ok(())
    }

    /// Runs a read-only query without touching the writer mutex when possible.
    fn read<T>(
        &self,
        name: &str,
        query: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        match &self.path {
            Some(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(|e| DeskError::storage(name, e))?;
                query(&conn).map_err(|e| DeskError::storage(name, e))
            }
            None => {
                let conn = self.conn.lock().map_err(sql_err)?;
                query(&conn).map_err(|e| DeskError::storage(name, e))
            }
        }
    }

    fn meta_rows(&self, sql: &str) -> Result<Vec<EntryMeta>> {
        let rows = self.read("sqlite", |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(sql_err))
            .collect()
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    #[instrument(skip(self), fields(dataset = %name))]
    async fn get(&self, name: &str, as_of: Option<NaiveDate>) -> Result<Option<CacheEntry>> {
        let row = self.read(name, |conn| {
            conn.query_row(
                "SELECT meta_json, data_json FROM datasets WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
        })?;

        let Some((meta_json, data_json)) = row else {
            debug!("Cache miss");
            return Ok(None);
        };
        let meta: EntryMeta = serde_json::from_str(&meta_json)
            .map_err(|e| DeskError::storage(name, format!("corrupt metadata: {e}")))?;
        let dataset: Dataset = serde_json::from_str(&data_json)
            .map_err(|e| DeskError::storage(name, format!("corrupt payload: {e}")))?;

        let entry = CacheEntry { meta, dataset };
        entry.verify()?;
        debug!(version = entry.meta.version, "Cache hit");
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
        let data_json = serde_json::to_string(dataset).map_err(|e| DeskError::storage(name, e))?;

        let conn = self.conn.lock().map_err(sql_err)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| DeskError::storage(name, e))?;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT version FROM datasets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DeskError::storage(name, e))?;
        let version = previous.map_or(0, |v| u64::try_from(v).unwrap_or(0)) + 1;

        let meta = EntryMeta::for_dataset(dataset, version, source_version);
        let meta_json = serde_json::to_string(&meta).map_err(|e| DeskError::storage(name, e))?;
        let version_sql = i64::try_from(version).map_err(|e| DeskError::storage(name, e))?;

        tx.execute(
            "INSERT OR REPLACE INTO datasets
             (name, version, fetched_at, meta_json, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, version_sql, meta.fetched_at.to_rfc3339(), meta_json, data_json],
        )
        .map_err(|e| DeskError::storage(name, e))?;
        tx.commit().map_err(|e| DeskError::storage(name, e))?;

        debug!(version, "Stored dataset");
        Ok(meta)
    }

    async fn metadata(&self, name: &str) -> Result<Option<EntryMeta>> {
        let json: Option<String> = self.read(name, |conn| {
            conn.query_row(
                "SELECT meta_json FROM datasets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
        })?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| DeskError::storage(name, e)))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<EntryMeta>> {
        self.meta_rows("SELECT meta_json FROM datasets ORDER BY name ASC")
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(sql_err)?;
        let deleted = conn
            .execute("DELETE FROM datasets WHERE name = ?1", params![name])
            .map_err(|e| DeskError::storage(name, e))?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn invalidate_stale(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| DeskError::InvalidParameter(format!("Invalid TTL duration: {e}")))?;
        let cutoff_str = cutoff.to_rfc3339();

        let conn = self.conn.lock().map_err(sql_err)?;
        let deleted = conn
            .execute(
                "DELETE FROM datasets WHERE fetched_at <= ?1",
                params![cutoff_str],
            )
            .map_err(sql_err)?;

        if deleted > 0 {
            debug!("Invalidated {} stale cache entries", deleted);
        }

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(sql_err)?;
        conn.execute("DELETE FROM datasets", []).map_err(sql_err)?;
        debug!("Cleared all cache entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdesk_core::{ColumnType, Record, Schema, Value};

    fn dataset(name: &str) -> Dataset {
        Dataset::from_records(
            name,
            Schema::of(&[("close", ColumnType::Float), ("volume", ColumnType::Int)]),
            vec![
                Record::new(
                    "AAPL",
                    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    vec![Value::Float(151.0), Value::Int(1_000_000)],
                ),
                Record::new(
                    "AAPL",
                    NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    vec![Value::Float(152.0), Value::Null],
                ),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store_initialization() {
        let store = SqliteStore::in_memory();
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::in_memory().unwrap();

        // Initially no data
        assert!(store.get("prices", None).await.unwrap().is_none());

        let ds = dataset("prices");
        store.put("prices", &ds, None).await.unwrap();
        let meta = store.put("prices", &ds, Some("v2")).await.unwrap();
        assert_eq!(meta.version, 2);

        let entry = store.get("prices", None).await.unwrap().unwrap();
        assert_eq!(entry.dataset, ds);
        assert_eq!(entry.meta.source_version.as_deref(), Some("v2"));

        let cut = store
            .get("prices", NaiveDate::from_ymd_opt(2024, 1, 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cut.dataset.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_invalidate_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        let old = dataset("financials").with_last_updated(Utc::now() - chrono::Duration::days(5));
        store.put("financials", &old, None).await.unwrap();
        store.put("prices", &dataset("prices"), None).await.unwrap();

        let removed = store
            .invalidate_stale(Duration::from_secs(86_400))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.metadata("prices").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_precision_floats_survive_storage() {
        let store = SqliteStore::in_memory().unwrap();
        let records = (1..=28u32)
            .map(|d| {
                let close = f64::from(d).sqrt() * std::f64::consts::PI / 7.0 + 1.0 / 3.0;
                Record::new(
                    "2330",
                    NaiveDate::from_ymd_opt(2024, 2, d).unwrap(),
                    vec![Value::Float(close), Value::Int(i64::from(d))],
                )
            })
            .collect();
        let ds = Dataset::from_records(
            "prices",
            Schema::of(&[("close", ColumnType::Float), ("volume", ColumnType::Int)]),
            records,
        )
        .unwrap();
        store.put("prices", &ds, None).await.unwrap();

        let entry = store.get("prices", None).await.unwrap().unwrap();
        assert_eq!(entry.dataset, ds);
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn test_file_store_reads_do_not_wait_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("cache.db")).unwrap();
        store.put("prices", &dataset("prices"), None).await.unwrap();

        let _writer = store.conn.lock().unwrap();
        let entry = store.get("prices", None).await.unwrap().unwrap();
        assert_eq!(entry.meta.version, 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.metadata("prices").await.unwrap().is_some());
    }
}
