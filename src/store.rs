use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::reading::{NewReading, Reading, Status};

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Appends the reading and returns the id assigned to it.
    async fn insert(&self, reading: NewReading) -> Result<u64, StoreError>;

    async fn count(&self) -> u64;

    async fn latest(&self) -> Option<Reading>;
}

const SCHEMA: &str = "
BEGIN;
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    heartRate INTEGER NOT NULL,
    status TEXT NOT NULL
);
COMMIT;
";

// Mirrors the table so count/latest never wait on the disk.
struct Summary {
    count: u64,
    latest: Option<Reading>,
}

/// The `readings` table in a SQLite database file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<SyncMutex<Connection>>,
    summary: Mutex<Summary>,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_path = path.clone();
        let (conn, summary) = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = Connection::open(&db_path)?;
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
            debug!("Journal mode {mode}");
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.execute_batch(SCHEMA)?;
            let summary = summarize(&conn)?;
            Ok((conn, summary))
        })
        .await??;

        info!("Opened reading store {} ({} readings)", path.display(), summary.count);

        Ok(SqliteStore {
            path,
            conn: Arc::new(SyncMutex::new(conn)),
            summary: Mutex::new(summary),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            job(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn insert(&self, reading: NewReading) -> Result<u64, StoreError> {
        // Held across the write so the summary follows insertion order.
        let mut summary = self.summary.lock().await;

        let reading = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO readings (timestamp, heartRate, status) VALUES (?1, ?2, ?3)",
                    params![reading.timestamp, reading.heart_rate, reading.status.as_str()],
                )?;
                Ok(reading.with_id(conn.last_insert_rowid() as u64))
            })
            .await?;

        summary.count += 1;
        summary.latest = Some(reading);
        debug!("Stored reading {}: {} bpm ({})", reading.id, reading.heart_rate, reading.status);

        Ok(reading.id)
    }

    async fn count(&self) -> u64 {
        self.summary.lock().await.count
    }

    async fn latest(&self) -> Option<Reading> {
        self.summary.lock().await.latest
    }
}

fn summarize(conn: &Connection) -> Result<Summary, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |r| r.get(0))?;

    let row: Option<(i64, i64, i32, String)> = conn
        .query_row(
            "SELECT id, timestamp, heartRate, status FROM readings ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

    let latest = match row {
        Some((id, timestamp, heart_rate, status)) => {
            let status = Status::parse(&status).ok_or_else(|| StoreError::Corrupt {
                id,
                reason: format!("unknown status {status:?}"),
            })?;
            Some(Reading {
                id: id as u64,
                timestamp,
                heart_rate,
                status,
            })
        }
        None => None,
    };

    Ok(Summary {
        count: count as u64,
        latest,
    })
}

/// Volatile store with the same id semantics as `SqliteStore`.
#[derive(Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub async fn readings(&self) -> Vec<Reading> {
        self.readings.lock().await.clone()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: NewReading) -> Result<u64, StoreError> {
        let mut readings = self.readings.lock().await;
        let id = readings.last().map_or(1, |r| r.id + 1);
        readings.push(reading.with_id(id));
        Ok(id)
    }

    async fn count(&self) -> u64 {
        self.readings.lock().await.len() as u64
    }

    async fn latest(&self) -> Option<Reading> {
        self.readings.lock().await.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_in(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("readings.db")).await.unwrap()
    }

    #[tokio::test]
    async fn empty_store_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        assert_eq!(store.count().await, 0);
        assert_eq!(store.latest().await, None);
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        let r1 = store.insert(NewReading::new(1_000, 55)).await.unwrap();
        let r2 = store.insert(NewReading::new(2_000, 75)).await.unwrap();
        let r3 = store.insert(NewReading::new(3_000, 130)).await.unwrap();

        assert_eq!((r1, r2, r3), (1, 2, 3));
        assert_eq!(store.count().await, 3);

        let latest = store.latest().await.unwrap();
        assert_eq!(latest.id, 3);
        assert_eq!(latest.heart_rate, 130);
        assert_eq!(latest.status, Status::High);
        assert_eq!(latest.timestamp, 3_000);
    }

    #[tokio::test]
    async fn readings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert(NewReading::new(1_000, 80)).await.unwrap();
            store.insert(NewReading::new(2_000, 45)).await.unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(store.count().await, 2);
        assert_eq!(store.latest().await.unwrap().status, Status::Low);
        assert_eq!(store.insert(NewReading::new(3_000, 90)).await.unwrap(), 3);

        let conn = Connection::open(&path).unwrap();
        let first: (i64, i64, i32, String) = conn
            .query_row(
                "SELECT id, timestamp, heartRate, status FROM readings ORDER BY id LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(first, (1, 1_000, 80, "Normal".to_string()));
    }

    #[tokio::test]
    async fn rejected_insert_leaves_store_usable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        let store = SqliteStore::open(&path).await.unwrap();
        store.insert(NewReading::new(1_000, 70)).await.unwrap();

        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_high BEFORE INSERT ON readings WHEN NEW.heartRate > 200
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let err = store.insert(NewReading::new(2_000, 250)).await.unwrap_err();
        assert!(matches!(err, StoreError::Sql(_)));
        assert_eq!(store.count().await, 1);
        assert_eq!(store.latest().await.unwrap().heart_rate, 70);

        assert_eq!(store.insert(NewReading::new(3_000, 72)).await.unwrap(), 2);
        drop(store);

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await, 2);
        assert_eq!(reopened.latest().await.unwrap().heart_rate, 72);
    }

    #[tokio::test]
    async fn unknown_status_fails_the_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.db");
        drop(SqliteStore::open(&path).await.unwrap());

        Connection::open(&path)
            .unwrap()
            .execute(
                "INSERT INTO readings (timestamp, heartRate, status) VALUES (1, 70, 'Elevated')",
                [],
            )
            .unwrap();

        let err = SqliteStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { id: 1, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_never_share_an_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_in(&dir).await);

        let mut handles = vec![];
        for hr in 50..70 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(NewReading::new(0, hr)).await.unwrap()
            }));
        }

        let mut ids = vec![];
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..=20).collect::<Vec<u64>>());
        assert_eq!(store.count().await, 20);

        let reopened = SqliteStore::open(store.path()).await.unwrap();
        assert_eq!(reopened.count().await, 20);
        assert_eq!(reopened.latest().await.unwrap().id, 20);
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        assert_eq!(store.latest().await, None);

        store.insert(NewReading::new(1, 100)).await.unwrap();
        store.insert(NewReading::new(2, 121)).await.unwrap();

        assert_eq!(store.count().await, 2);
        assert_eq!(store.latest().await.unwrap().id, 2);
        let ids: Vec<u64> = store.readings().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
