//! SQLite table backend.
//!
//! All tables share one `entities` table; each row holds the entity as a
//! JSON document. Calls run on the blocking pool so the async runtime is
//! never parked on disk I/O.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{StoreError, Table, TableEntity};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    table_name    TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    row_key       TEXT NOT NULL,
    body          TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (table_name, partition_key, row_key)
);
";

/// Shared SQLite connection.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Task("sqlite connection lock poisoned".to_string()))
    }
}

/// Typed view over the shared `entities` table
pub struct SqliteTable<T> {
    db: Arc<SqliteDatabase>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: TableEntity> SqliteTable<T> {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.conn()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn decode<T: TableEntity>(bodies: Vec<String>) -> Result<Vec<T>, StoreError> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl<T: TableEntity> Table<T> for SqliteTable<T> {
    async fn add(&self, entity: &T) -> Result<(), StoreError> {
        let pk = entity.partition_key();
        let rk = entity.row_key();
        let body = serde_json::to_string(entity)?;

        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO entities (table_name, partition_key, row_key, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![T::TABLE, pk, rk, body, Utc::now().to_rfc3339()],
            )?;

            if inserted == 0 {
                return Err(StoreError::AlreadyExists {
                    table: T::TABLE,
                    partition_key: pk,
                    row_key: rk,
                });
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<T>, StoreError> {
        let pk = partition_key.to_string();
        let rk = row_key.to_string();

        let body: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT body FROM entities
                     WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
                    params![T::TABLE, pk, rk],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn get_partition(&self, partition_key: &str) -> Result<Vec<T>, StoreError> {
        let pk = partition_key.to_string();

        let bodies = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM entities
                     WHERE table_name = ?1 AND partition_key = ?2
                     ORDER BY row_key",
                )?;
                let rows = stmt.query_map(params![T::TABLE, pk], |row| row.get::<_, String>(0))?;
                let bodies = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(bodies)
            })
            .await?;

        decode(bodies)
    }

    async fn upsert(&self, entity: &T) -> Result<(), StoreError> {
        let pk = entity.partition_key();
        let rk = entity.row_key();
        let body = serde_json::to_string(entity)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entities (table_name, partition_key, row_key, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (table_name, partition_key, row_key)
                 DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![T::TABLE, pk, rk, body, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let pk = entity.partition_key();
        let rk = entity.row_key();
        let body = serde_json::to_string(entity)?;

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE entities SET body = ?4, updated_at = ?5
                 WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
                params![T::TABLE, pk, rk, body, Utc::now().to_rfc3339()],
            )?;

            if changed == 0 {
                return Err(StoreError::NotFound {
                    table: T::TABLE,
                    partition_key: pk,
                    row_key: rk,
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StoreError> {
        let pk = partition_key.to_string();
        let rk = row_key.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM entities
                 WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
                params![T::TABLE, pk, rk],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        let bodies = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM entities
                     WHERE table_name = ?1
                     ORDER BY partition_key, row_key",
                )?;
                let rows = stmt.query_map(params![T::TABLE], |row| row.get::<_, String>(0))?;
                let bodies = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(bodies)
            })
            .await?;

        decode(bodies)
    }
}
