//! Adapter interfaces for external systems.
//!
//! The orchestration core only talks to the outside world through these
//! traits: the container runtime that hosts builders, the file-share service
//! that stores output batches, and the callback sink that notifies callers.

pub mod http_callback;
pub mod local_file_share;
pub mod podman;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{CommitFile, DataStandard, JobId};

pub use http_callback::HttpCallbackSink;
pub use local_file_share::LocalFileShare;
pub use podman::CliContainerRuntime;

// ============================================================================
// Container runtime
// ============================================================================

/// What to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,

    /// Environment passed to the container process
    pub env: Vec<(String, String)>,
}

/// A started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Observed container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited { exit_code: i64 },
}

/// Exit information of a finished container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: i64,
}

/// Container runtime failures, kept distinct so operators can tell
/// "never ran" from "ran too long" from "could not be observed"
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container '{name}' failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Failed to observe container {id}: {reason}")]
    WaitFailed { id: String, reason: String },

    #[error("Container {id} did not finish within {after:?}")]
    TimedOut { id: String, after: Duration },

    #[error("Failed to remove container {id}: {reason}")]
    RemoveFailed { id: String, reason: String },

    #[error("Container runtime error: {0}")]
    Runtime(String),
}

/// A runtime that can host builder containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable runtime name
    fn name(&self) -> &str;

    /// Launch a detached container
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError>;

    /// Current status of a container
    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError>;

    /// Poll until the container exits or `timeout` elapses
    async fn wait(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ExitInfo, ContainerError> {
        let poll = async {
            loop {
                match self.status(handle).await {
                    Ok(ContainerStatus::Exited { exit_code }) => return Ok(ExitInfo { exit_code }),
                    Ok(_) => tokio::time::sleep(poll_interval).await,
                    Err(e) => {
                        return Err(ContainerError::WaitFailed {
                            id: handle.id.clone(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ContainerError::TimedOut {
                id: handle.id.clone(),
                after: timeout,
            }),
        }
    }

    /// Captured stdout/stderr lines
    async fn logs(&self, handle: &ContainerHandle) -> Result<Vec<String>, ContainerError>;

    /// Remove the container, stopping it if needed. Removing an already
    /// removed container succeeds.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;
}

// ============================================================================
// File-share service
// ============================================================================

/// A committed batch found by a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub batch_id: String,
    pub data_standard: DataStandard,
    pub committed_at: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Output batch storage
#[async_trait]
pub trait FileShareService: Send + Sync {
    /// Open a new, uncommitted batch
    async fn create_batch(&self, data_standard: DataStandard, correlation_id: &str) -> Result<String>;

    /// Upload a file into an open batch
    async fn add_file_to_batch(
        &self,
        batch_id: &str,
        content: &[u8],
        file_name: &str,
        content_type: &str,
        correlation_id: &str,
    ) -> Result<CommitFile>;

    /// Commit a batch with the given file handles
    async fn commit_batch(&self, batch_id: &str, files: &[CommitFile], correlation_id: &str) -> Result<()>;

    /// Committed, unexpired batches in the same scope as `batch_id`,
    /// excluding `batch_id` itself
    async fn search_committed_batches_excluding_current(
        &self,
        batch_id: &str,
        correlation_id: &str,
    ) -> Result<Vec<BatchEntry>>;

    /// Mark batches expired
    async fn set_expiry_date(&self, entries: &[BatchEntry], correlation_id: &str) -> Result<()>;
}

// ============================================================================
// Callback sink
// ============================================================================

/// Notification sent to a job's callback URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub job_id: JobId,
    pub batch_id: String,
    pub correlation_id: String,
    pub data_standard: DataStandard,
    pub exchange_set_product_count: usize,
    pub products: String,
    pub completed_at: DateTime<Utc>,
}

/// Delivers callback notifications
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn post(
        &self,
        callback_uri: &str,
        payload: &CallbackPayload,
        cancellation: &CancellationToken,
    ) -> Result<()>;
}
