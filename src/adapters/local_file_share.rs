//! File-share service on a local directory tree.
//!
//! Layout: `<root>/<batch_id>/batch.json` holds batch metadata and
//! `<root>/<batch_id>/files/` holds uploaded files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{CommitFile, DataStandard};

use super::{BatchEntry, FileShareService};

const METADATA_FILE: &str = "batch.json";

/// Persisted batch metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchMetadata {
    batch_id: String,
    data_standard: DataStandard,
    correlation_id: String,
    created_at: DateTime<Utc>,
    committed_at: Option<DateTime<Utc>>,
    expiry_date: Option<DateTime<Utc>>,
    files: Vec<CommitFile>,
}

impl BatchMetadata {
    fn entry(&self) -> BatchEntry {
        BatchEntry {
            batch_id: self.batch_id.clone(),
            data_standard: self.data_standard,
            committed_at: self.committed_at,
            expiry_date: self.expiry_date,
        }
    }
}

/// Directory-backed batch storage
pub struct LocalFileShare {
    root: PathBuf,

    /// Serialises metadata read-modify-write
    lock: Mutex<()>,
}

impl LocalFileShare {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create batch root: {}", root.display()))?;

        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn batch_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join(batch_id)
    }

    /// Path of an uploaded file
    pub fn file_path(&self, batch_id: &str, file_name: &str) -> PathBuf {
        self.batch_dir(batch_id).join("files").join(file_name)
    }

    async fn read_metadata(&self, batch_id: &str) -> Result<BatchMetadata> {
        let path = self.batch_dir(batch_id).join(METADATA_FILE);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Unknown batch {}", batch_id))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse batch metadata: {}", path.display()))
    }

    async fn write_metadata(&self, metadata: &BatchMetadata) -> Result<()> {
        let path = self.batch_dir(&metadata.batch_id).join(METADATA_FILE);
        let json = serde_json::to_string_pretty(metadata).context("Failed to serialize batch metadata")?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write batch metadata: {}", path.display()))
    }

    async fn all_batches(&self) -> Result<Vec<BatchMetadata>> {
        let mut batches = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                match self.read_metadata(name).await {
                    Ok(metadata) => batches.push(metadata),
                    Err(e) => debug!(dir = name, error = %e, "Skipping directory without batch metadata"),
                }
            }
        }

        Ok(batches)
    }

    /// Metadata view of one batch (for inspection and tests)
    pub async fn batch(&self, batch_id: &str) -> Result<BatchEntry> {
        Ok(self.read_metadata(batch_id).await?.entry())
    }

    /// Files committed into a batch
    pub async fn committed_files(&self, batch_id: &str) -> Result<Vec<CommitFile>> {
        let metadata = self.read_metadata(batch_id).await?;
        if metadata.committed_at.is_none() {
            return Ok(Vec::new());
        }
        Ok(metadata.files)
    }
}

#[async_trait]
impl FileShareService for LocalFileShare {
    async fn create_batch(&self, data_standard: DataStandard, correlation_id: &str) -> Result<String> {
        let batch_id = Uuid::new_v4().to_string();
        let files_dir = self.batch_dir(&batch_id).join("files");

        fs::create_dir_all(&files_dir)
            .await
            .with_context(|| format!("Failed to create batch directory: {}", files_dir.display()))?;

        self.write_metadata(&BatchMetadata {
            batch_id: batch_id.clone(),
            data_standard,
            correlation_id: correlation_id.to_string(),
            created_at: Utc::now(),
            committed_at: None,
            expiry_date: None,
            files: Vec::new(),
        })
        .await?;

        Ok(batch_id)
    }

    async fn add_file_to_batch(
        &self,
        batch_id: &str,
        content: &[u8],
        file_name: &str,
        content_type: &str,
        correlation_id: &str,
    ) -> Result<CommitFile> {
        let _guard = self.lock.lock().await;
        let metadata = self.read_metadata(batch_id).await?;

        if metadata.committed_at.is_some() {
            anyhow::bail!("Batch {} is already committed", batch_id);
        }

        let path = self.file_path(batch_id, file_name);
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))?;

        let hash = hex::encode(Sha256::digest(content));
        debug!(batch_id, file_name, content_type, correlation_id, "File added to batch");

        Ok(CommitFile::new(file_name, hash))
    }

    async fn commit_batch(&self, batch_id: &str, files: &[CommitFile], correlation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut metadata = self.read_metadata(batch_id).await?;

        if metadata.committed_at.is_some() {
            anyhow::bail!("Batch {} is already committed", batch_id);
        }

        metadata.committed_at = Some(Utc::now());
        metadata.files = files.to_vec();
        self.write_metadata(&metadata).await?;

        debug!(batch_id, files = files.len(), correlation_id, "Batch committed");
        Ok(())
    }

    async fn search_committed_batches_excluding_current(
        &self,
        batch_id: &str,
        _correlation_id: &str,
    ) -> Result<Vec<BatchEntry>> {
        let current = self.read_metadata(batch_id).await?;

        let mut found: Vec<BatchEntry> = self
            .all_batches()
            .await?
            .into_iter()
            .filter(|b| {
                b.batch_id != batch_id
                    && b.data_standard == current.data_standard
                    && b.committed_at.is_some()
                    && b.expiry_date.is_none()
            })
            .map(|b| b.entry())
            .collect();

        found.sort_by(|a, b| a.committed_at.cmp(&b.committed_at));
        Ok(found)
    }

    async fn set_expiry_date(&self, entries: &[BatchEntry], correlation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let now = Utc::now();

        for entry in entries {
            let mut metadata = self.read_metadata(&entry.batch_id).await?;
            metadata.expiry_date = Some(now);
            self.write_metadata(&metadata).await?;
            debug!(batch_id = %entry.batch_id, correlation_id, "Batch expired");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_batch_lifecycle() {
        let temp = TempDir::new().unwrap();
        let share = LocalFileShare::open(temp.path()).await.unwrap();

        let batch_id = share.create_batch(DataStandard::S100, "corr").await.unwrap();
        let file = share
            .add_file_to_batch(&batch_id, b"hello", "error.txt", "text/plain", "corr")
            .await
            .unwrap();

        assert_eq!(file.file_name, "error.txt");
        assert_eq!(file.hash.len(), 64);
        assert!(share.committed_files(&batch_id).await.unwrap().is_empty());

        share.commit_batch(&batch_id, &[file.clone()], "corr").await.unwrap();

        assert_eq!(share.committed_files(&batch_id).await.unwrap(), vec![file]);
        assert!(share.commit_batch(&batch_id, &[], "corr").await.is_err());
    }

    #[tokio::test]
    async fn test_search_excludes_current_and_other_standards() {
        let temp = TempDir::new().unwrap();
        let share = LocalFileShare::open(temp.path()).await.unwrap();

        let old = share.create_batch(DataStandard::S100, "c").await.unwrap();
        share.commit_batch(&old, &[], "c").await.unwrap();

        let other_standard = share.create_batch(DataStandard::S57, "c").await.unwrap();
        share.commit_batch(&other_standard, &[], "c").await.unwrap();

        let uncommitted = share.create_batch(DataStandard::S100, "c").await.unwrap();

        let current = share.create_batch(DataStandard::S100, "c").await.unwrap();
        share.commit_batch(&current, &[], "c").await.unwrap();

        let found = share
            .search_committed_batches_excluding_current(&current, "c")
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].batch_id, old);
        assert_ne!(found[0].batch_id, uncommitted);

        share.set_expiry_date(&found, "c").await.unwrap();
        assert!(share.batch(&old).await.unwrap().expiry_date.is_some());

        // Expired batches are not found again
        let again = share
            .search_committed_batches_excluding_current(&current, "c")
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
