//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use exset::adapters::{
    BatchEntry, CallbackPayload, CallbackSink, ContainerError, ContainerHandle, ContainerRuntime,
    ContainerSpec, ContainerStatus, FileShareService,
};
use exset::config::OrchestratorConfig;
use exset::core::completion::{
    CompletionContext, CompletionNodeEnvironment, CompletionServices, JobCompletion,
};
use exset::core::{BuilderLogRecord, LogForwarder, LogSink};
use exset::domain::{
    Build, BuildNodeStatus, BuilderExitCode, CommitFile, DataStandard, Job, JobId, JobState,
    NodeResultStatus, Product,
};
use exset::store::{MemoryTable, StoreError, Stores, Table, TableEntity};

// ============================================================================
// Fixtures
// ============================================================================

pub fn products() -> Vec<Product> {
    vec![
        Product::new("101GB1", 1, 0, "valid"),
        Product::new("104FR2", 0, 1, "valid"),
    ]
}

/// Job J1, in progress, batch B1
pub fn test_job() -> Job {
    let mut job = Job::new(
        JobId::from("J1"),
        DataStandard::S100,
        vec!["101GB1".to_string(), "104FR2".to_string()],
        "corr-1".to_string(),
    );
    job.callback_uri = Some("https://caller.example/callback".to_string());
    job.assign_batch("B1").unwrap();
    job.transition_to(JobState::InProgress).unwrap();
    job
}

pub fn builder_file() -> CommitFile {
    CommitFile::new("S100_ExchangeSet.zip", "4f2c9a")
}

/// Build for a job with one builder output file and two builder steps
pub fn test_build(job: &Job) -> Build {
    let mut build = Build::for_job(job, products());
    build.build_commit_info = vec![builder_file()];
    build.statuses = vec![
        BuildNodeStatus::new("download_products", NodeResultStatus::Succeeded),
        BuildNodeStatus::new("create_exchange_set", NodeResultStatus::Succeeded),
    ];
    build.log_messages = vec![
        r#"{"Level":"Information","MessageTemplate":"Build started"}"#.to_string(),
        r#"{"Level":"Error","Message":"Download failed"}"#.to_string(),
    ];
    build
}

pub fn context(job: Job, build: Build, exit_code: BuilderExitCode) -> CompletionContext {
    context_with_config(job, build, exit_code, OrchestratorConfig::default())
}

pub fn context_with_config(
    job: Job,
    build: Build,
    exit_code: BuilderExitCode,
    config: OrchestratorConfig,
) -> CompletionContext {
    let environment = CompletionNodeEnvironment::new(Arc::new(config), exit_code);
    CompletionContext::new(job, build, environment, JobCompletion::new())
}

/// Collaborators of one saga run, kept for assertions
pub struct Harness {
    pub stores: Stores,
    pub file_share: Arc<RecordingFileShare>,
    pub callback: Arc<RecordingCallback>,
    pub log_sink: Arc<CapturingLogSink>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(RecordingFileShare::default(), RecordingCallback::default())
    }
}

impl Harness {
    pub fn new(file_share: RecordingFileShare, callback: RecordingCallback) -> Self {
        Self {
            stores: Stores::in_memory(),
            file_share: Arc::new(file_share),
            callback: Arc::new(callback),
            log_sink: Arc::new(CapturingLogSink::default()),
        }
    }

    pub fn services(&self) -> CompletionServices {
        CompletionServices {
            stores: self.stores.clone(),
            file_share: self.file_share.clone(),
            callback: self.callback.clone(),
            log_forwarder: LogForwarder::new(self.log_sink.clone(), tracing::Level::INFO),
        }
    }
}

// ============================================================================
// Container runtime
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum RuntimeBehavior {
    /// Exit immediately with this code
    Exit(i64),

    /// Never exit
    Hang,

    /// Reject the start request
    StartFails,

    /// Take this long to start
    SlowStart(Duration),

    /// Start, then fail every status query
    WaitFails,
}

struct Reporter {
    stores: Stores,
    files: Vec<CommitFile>,
    statuses: Vec<BuildNodeStatus>,
}

/// Scriptable container runtime that records every call
pub struct FakeRuntime {
    behavior: RuntimeBehavior,
    logs: Vec<String>,
    remove_fails: bool,
    reporter: Option<Reporter>,
    pub started: Mutex<Vec<ContainerSpec>>,
    pub removed: Mutex<Vec<String>>,
    pub log_requests: AtomicUsize,
}

impl FakeRuntime {
    pub fn new(behavior: RuntimeBehavior) -> Self {
        Self {
            behavior,
            logs: Vec::new(),
            remove_fails: false,
            reporter: None,
            started: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            log_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_logs(mut self, lines: &[&str]) -> Self {
        self.logs = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn failing_removal(mut self) -> Self {
        self.remove_fails = true;
        self
    }

    /// Write builder results into the build table on start, like a real builder
    pub fn reporting(mut self, stores: Stores, files: Vec<CommitFile>, statuses: Vec<BuildNodeStatus>) -> Self {
        self.reporter = Some(Reporter {
            stores,
            files,
            statuses,
        });
        self
    }

    pub fn started_names(&self) -> Vec<String> {
        self.started.lock().unwrap().iter().map(|s| s.name.clone()).collect()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        self.started.lock().unwrap().push(spec.clone());

        match self.behavior {
            RuntimeBehavior::StartFails => {
                return Err(ContainerError::StartFailed {
                    name: spec.name.clone(),
                    reason: "image not found".to_string(),
                })
            }
            RuntimeBehavior::SlowStart(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        if let Some(reporter) = &self.reporter {
            let job_id = spec
                .env
                .iter()
                .find(|(k, _)| k == "JOB_ID")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();

            let builds = reporter.stores.builds.get_partition(&job_id).await.unwrap();
            for mut build in builds {
                build.build_commit_info = reporter.files.clone();
                build.statuses = reporter.statuses.clone();
                reporter.stores.builds.upsert(&build).await.unwrap();
            }
        }

        Ok(ContainerHandle {
            id: format!("id-{}", spec.name),
            name: spec.name.clone(),
        })
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError> {
        match self.behavior {
            RuntimeBehavior::Exit(exit_code) => Ok(ContainerStatus::Exited { exit_code }),
            RuntimeBehavior::WaitFails => Err(ContainerError::Runtime(format!(
                "inspect {} failed",
                handle.id
            ))),
            _ => Ok(ContainerStatus::Running),
        }
    }

    async fn logs(&self, _handle: &ContainerHandle) -> Result<Vec<String>, ContainerError> {
        self.log_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.logs.clone())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.removed.lock().unwrap().push(handle.id.clone());

        if self.remove_fails {
            return Err(ContainerError::RemoveFailed {
                id: handle.id.clone(),
                reason: "device busy".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// File share
// ============================================================================

/// In-memory file share that records calls and can be told to fail
#[derive(Default)]
pub struct RecordingFileShare {
    pub fail_create: bool,
    pub fail_add: bool,
    pub panic_on_add: bool,
    pub fail_commit: bool,
    pub fail_search: bool,

    /// Returned by searches
    pub previous: Vec<BatchEntry>,

    pub created: Mutex<Vec<String>>,
    pub added: Mutex<Vec<(String, String, String)>>,
    pub commits: Mutex<Vec<(String, Vec<CommitFile>)>>,
    pub expired: Mutex<Vec<String>>,
}

impl RecordingFileShare {
    /// (batch, file name, text) of every uploaded file
    pub fn added_files(&self) -> Vec<(String, String, String)> {
        self.added.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<(String, Vec<CommitFile>)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn expired(&self) -> Vec<String> {
        self.expired.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileShareService for RecordingFileShare {
    async fn create_batch(&self, _data_standard: DataStandard, _correlation_id: &str) -> Result<String> {
        if self.fail_create {
            anyhow::bail!("file share unavailable");
        }
        let mut created = self.created.lock().unwrap();
        let batch_id = format!("B{}", created.len() + 1);
        created.push(batch_id.clone());
        Ok(batch_id)
    }

    async fn add_file_to_batch(
        &self,
        batch_id: &str,
        content: &[u8],
        file_name: &str,
        _content_type: &str,
        _correlation_id: &str,
    ) -> Result<CommitFile> {
        if self.panic_on_add {
            panic!("file share client crashed");
        }
        if self.fail_add {
            anyhow::bail!("upload rejected");
        }

        self.added.lock().unwrap().push((
            batch_id.to_string(),
            file_name.to_string(),
            String::from_utf8_lossy(content).to_string(),
        ));
        Ok(CommitFile::new(file_name, format!("hash-{}", content.len())))
    }

    async fn commit_batch(&self, batch_id: &str, files: &[CommitFile], _correlation_id: &str) -> Result<()> {
        if self.fail_commit {
            anyhow::bail!("commit rejected");
        }
        self.commits
            .lock()
            .unwrap()
            .push((batch_id.to_string(), files.to_vec()));
        Ok(())
    }

    async fn search_committed_batches_excluding_current(
        &self,
        batch_id: &str,
        _correlation_id: &str,
    ) -> Result<Vec<BatchEntry>> {
        if self.fail_search {
            anyhow::bail!("search timed out");
        }
        Ok(self
            .previous
            .iter()
            .filter(|b| b.batch_id != batch_id)
            .cloned()
            .collect())
    }

    async fn set_expiry_date(&self, entries: &[BatchEntry], _correlation_id: &str) -> Result<()> {
        self.expired
            .lock()
            .unwrap()
            .extend(entries.iter().map(|e| e.batch_id.clone()));
        Ok(())
    }
}

// ============================================================================
// Callback sink
// ============================================================================

#[derive(Default)]
pub struct RecordingCallback {
    pub fail: bool,
    pub panic: bool,
    pub posts: Mutex<Vec<(String, CallbackPayload)>>,
}

impl RecordingCallback {
    pub fn posts(&self) -> Vec<(String, CallbackPayload)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackSink for RecordingCallback {
    async fn post(
        &self,
        callback_uri: &str,
        payload: &CallbackPayload,
        _cancellation: &CancellationToken,
    ) -> Result<()> {
        if self.panic {
            panic!("callback client crashed");
        }
        self.posts
            .lock()
            .unwrap()
            .push((callback_uri.to_string(), payload.clone()));
        if self.fail {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(())
    }
}

// ============================================================================
// Log sink
// ============================================================================

#[derive(Default)]
pub struct CapturingLogSink {
    pub records: Mutex<Vec<BuilderLogRecord>>,
}

impl CapturingLogSink {
    pub fn records(&self) -> Vec<BuilderLogRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl LogSink for CapturingLogSink {
    fn emit(&self, record: &BuilderLogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Sink that crashes on the first record
pub struct PanickingLogSink;

impl LogSink for PanickingLogSink {
    fn emit(&self, _record: &BuilderLogRecord) {
        panic!("log sink crashed");
    }
}

// ============================================================================
// Tables
// ============================================================================

/// A table whose every operation fails
pub struct FailingTable<T>(PhantomData<fn() -> T>);

impl<T> FailingTable<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

fn unavailable() -> StoreError {
    StoreError::Task("table unavailable".to_string())
}

#[async_trait]
impl<T: TableEntity> Table<T> for FailingTable<T> {
    async fn add(&self, _entity: &T) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn get(&self, _partition_key: &str, _row_key: &str) -> Result<Option<T>, StoreError> {
        Err(unavailable())
    }

    async fn get_partition(&self, _partition_key: &str) -> Result<Vec<T>, StoreError> {
        Err(unavailable())
    }

    async fn upsert(&self, _entity: &T) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn update(&self, _entity: &T) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn delete(&self, _partition_key: &str, _row_key: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Err(unavailable())
    }
}

/// In-memory job table that records every stored state and can refuse
/// terminal writes
#[derive(Default)]
pub struct RecordingJobs {
    inner: MemoryTable<Job>,
    pub reject_terminal: bool,
    pub upserted: Mutex<Vec<JobState>>,
}

impl RecordingJobs {
    pub fn rejecting_terminal() -> Self {
        Self {
            reject_terminal: true,
            ..Default::default()
        }
    }

    pub fn upserted_states(&self) -> Vec<JobState> {
        self.upserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Table<Job> for RecordingJobs {
    async fn add(&self, entity: &Job) -> Result<(), StoreError> {
        self.inner.add(entity).await
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<Option<Job>, StoreError> {
        self.inner.get(partition_key, row_key).await
    }

    async fn get_partition(&self, partition_key: &str) -> Result<Vec<Job>, StoreError> {
        self.inner.get_partition(partition_key).await
    }

    async fn upsert(&self, entity: &Job) -> Result<(), StoreError> {
        if self.reject_terminal && entity.state.is_terminal() {
            return Err(unavailable());
        }
        self.upserted.lock().unwrap().push(entity.state);
        self.inner.upsert(entity).await
    }

    async fn update(&self, entity: &Job) -> Result<(), StoreError> {
        self.inner.update(entity).await
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StoreError> {
        self.inner.delete(partition_key, row_key).await
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list().await
    }
}
