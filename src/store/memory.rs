//! In-process table backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StoreError, Table, TableEntity};

type Key = (String, String);

/// Table held in memory, ordered by `(partition_key, row_key)`
pub struct MemoryTable<T> {
    rows: RwLock<BTreeMap<Key, T>>,
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

fn key_of<T: TableEntity>(entity: &T) -> Key {
    (entity.partition_key(), entity.row_key())
}

#[async_trait]
impl<T: TableEntity> Table<T> for MemoryTable<T> {
    async fn add(&self, entity: &T) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let key = key_of(entity);

        if rows.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                table: T::TABLE,
                partition_key: key.0,
                row_key: key.1,
            });
        }

        rows.insert(key, entity.clone());
        Ok(())
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<T>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn get_partition(&self, partition_key: &str) -> Result<Vec<T>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|((pk, _), _)| pk == partition_key)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn upsert(&self, entity: &T) -> Result<(), StoreError> {
        self.rows.write().await.insert(key_of(entity), entity.clone());
        Ok(())
    }

    async fn update(&self, entity: &T) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let key = key_of(entity);

        match rows.get_mut(&key) {
            Some(existing) => {
                *existing = entity.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: T::TABLE,
                partition_key: key.0,
                row_key: key.1,
            }),
        }
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .remove(&(partition_key.to_string(), row_key.to_string()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataStandard, Job, JobId, JobState};

    fn job(id: &str) -> Job {
        Job::new(JobId::from(id), DataStandard::S57, Vec::new(), "corr".to_string())
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let table: MemoryTable<Job> = MemoryTable::new();

        table.add(&job("J1")).await.unwrap();
        let err = table.add(&job("J1")).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists { table: "jobs", .. }));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let table: MemoryTable<Job> = MemoryTable::new();
        let mut j = job("J1");

        assert!(matches!(
            table.update(&j).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));

        table.add(&j).await.unwrap();
        j.state = JobState::InProgress;
        table.update(&j).await.unwrap();

        let stored = table.get("J1", "job").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::InProgress);
    }

    #[tokio::test]
    async fn test_upsert_delete_list() {
        let table: MemoryTable<Job> = MemoryTable::new();

        table.upsert(&job("J1")).await.unwrap();
        table.upsert(&job("J2")).await.unwrap();
        table.upsert(&job("J2")).await.unwrap();
        assert_eq!(table.list().await.unwrap().len(), 2);
        assert_eq!(table.get_partition("J2").await.unwrap().len(), 1);

        table.delete("J1", "job").await.unwrap();
        table.delete("J1", "job").await.unwrap();
        assert!(table.get("J1", "job").await.unwrap().is_none());
        assert_eq!(table.list().await.unwrap().len(), 1);
    }
}
