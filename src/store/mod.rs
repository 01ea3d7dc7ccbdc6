//! Key-value persistence for jobs, builds and audit records.
//!
//! Every entity lives in a named table under a `(partition_key, row_key)`
//! pair. Writes are last-write-wins; there is no read-modify-write
//! transaction, which is why fingerprint deduplication is best effort.

pub mod entities;
pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{Build, BuildFingerprint, BuildMemento, DataStandardTimestamp, Job, JobHistory};

pub use memory::MemoryTable;
pub use sqlite::{SqliteDatabase, SqliteTable};

/// Errors returned by table operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entity not found: {table}/{partition_key}/{row_key}")]
    NotFound {
        table: &'static str,
        partition_key: String,
        row_key: String,
    },

    #[error("Entity already exists: {table}/{partition_key}/{row_key}")]
    AlreadyExists {
        table: &'static str,
        partition_key: String,
        row_key: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// An entity that can be stored in a table
pub trait TableEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name
    const TABLE: &'static str;

    fn partition_key(&self) -> String;

    fn row_key(&self) -> String;
}

/// CRUD over one table. Every operation reports failure through `Result`.
#[async_trait]
pub trait Table<T: TableEntity>: Send + Sync {
    /// Insert; fails with `AlreadyExists` if the key is taken
    async fn add(&self, entity: &T) -> Result<(), StoreError>;

    /// Fetch one entity
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<T>, StoreError>;

    /// Fetch every entity in a partition, ordered by row key
    async fn get_partition(&self, partition_key: &str) -> Result<Vec<T>, StoreError>;

    /// Insert or replace
    async fn upsert(&self, entity: &T) -> Result<(), StoreError>;

    /// Replace; fails with `NotFound` if the key is absent
    async fn update(&self, entity: &T) -> Result<(), StoreError>;

    /// Remove; removing a missing entity is not an error
    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StoreError>;

    /// Every entity in the table
    async fn list(&self) -> Result<Vec<T>, StoreError>;
}

/// The tables the orchestrator reads and writes
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn Table<Job>>,
    pub builds: Arc<dyn Table<Build>>,
    pub fingerprints: Arc<dyn Table<BuildFingerprint>>,
    pub histories: Arc<dyn Table<JobHistory>>,
    pub mementos: Arc<dyn Table<BuildMemento>>,
    pub timestamps: Arc<dyn Table<DataStandardTimestamp>>,
}

impl Stores {
    /// Ephemeral in-process tables
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(MemoryTable::new()),
            builds: Arc::new(MemoryTable::new()),
            fingerprints: Arc::new(MemoryTable::new()),
            histories: Arc::new(MemoryTable::new()),
            mementos: Arc::new(MemoryTable::new()),
            timestamps: Arc::new(MemoryTable::new()),
        }
    }

    /// Tables backed by one SQLite file
    pub fn sqlite(path: &Path) -> Result<Self, StoreError> {
        let db = Arc::new(SqliteDatabase::open(path)?);
        Ok(Self::on_database(db))
    }

    /// Tables sharing an existing database
    pub fn on_database(db: Arc<SqliteDatabase>) -> Self {
        Self {
            jobs: Arc::new(SqliteTable::new(db.clone())),
            builds: Arc::new(SqliteTable::new(db.clone())),
            fingerprints: Arc::new(SqliteTable::new(db.clone())),
            histories: Arc::new(SqliteTable::new(db.clone())),
            mementos: Arc::new(SqliteTable::new(db.clone())),
            timestamps: Arc::new(SqliteTable::new(db)),
        }
    }
}
