//! Completion saga.
//!
//! After a builder run ends, the saga reconciles its result: commits the
//! output batch, records audit history, replays logs, notifies the caller
//! and sets the job's terminal state. The node order is fixed and every
//! node runs; each decides for itself whether it has work to do.

pub mod nodes;

use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::adapters::{CallbackSink, FileShareService};
use crate::config::OrchestratorConfig;
use crate::domain::{Build, BuilderExitCode, CommitFile, Job, JobState};
use crate::store::Stores;

use super::log_forwarder::LogForwarder;
use super::node::{Pipeline, PipelineReport};

pub use nodes::{
    CommitFileShareBatchNode, CompleteJobNode, CreateErrorFileNode, ExpireSupersededBatchesNode,
    RecordFingerprintNode, ReplayLogsNode, SendCallbackNode, WriteBuildMementoNode,
};

/// Per-run environment shared by every completion node
#[derive(Clone)]
pub struct CompletionNodeEnvironment {
    pub config: Arc<OrchestratorConfig>,

    /// Cancelled when the saga deadline passes
    pub cancellation: CancellationToken,

    pub builder_exit_code: BuilderExitCode,
}

impl CompletionNodeEnvironment {
    pub fn new(config: Arc<OrchestratorConfig>, builder_exit_code: BuilderExitCode) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
            builder_exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.builder_exit_code.is_success()
    }
}

/// Lets callers await a job's terminal state
#[derive(Clone)]
pub struct JobCompletion {
    tx: Arc<watch::Sender<Option<JobState>>>,
}

impl Default for JobCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCompletion {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish the terminal state
    pub fn signal(&self, state: JobState) {
        self.tx.send_replace(Some(state));
    }

    /// Terminal state, if already signalled
    pub fn current(&self) -> Option<JobState> {
        *self.tx.borrow()
    }

    /// Wait until a terminal state is signalled. Yields `None` if every
    /// other handle is dropped first, e.g. when the run ends without
    /// persisting a terminal state.
    pub async fn wait(self) -> Option<JobState> {
        let mut rx = self.tx.subscribe();
        drop(self);
        let state = rx.wait_for(Option::is_some).await.ok()?;
        *state
    }
}

/// Shared state for one saga run
pub struct CompletionContext {
    pub job: RwLock<Job>,
    pub build: Build,
    pub environment: CompletionNodeEnvironment,
    pub completion: JobCompletion,

    /// Set when an error file was written into the batch
    error_file: Mutex<Option<CommitFile>>,
}

impl CompletionContext {
    pub fn new(
        job: Job,
        build: Build,
        environment: CompletionNodeEnvironment,
        completion: JobCompletion,
    ) -> Self {
        Self {
            job: RwLock::new(job),
            build,
            environment,
            completion,
            error_file: Mutex::new(None),
        }
    }

    /// Copy of the job as it currently stands
    pub async fn job_snapshot(&self) -> Job {
        self.job.read().await.clone()
    }

    pub async fn batch_id(&self) -> Option<String> {
        self.job.read().await.batch_id.clone()
    }

    pub async fn error_file(&self) -> Option<CommitFile> {
        self.error_file.lock().await.clone()
    }

    pub async fn error_file_created(&self) -> bool {
        self.error_file.lock().await.is_some()
    }

    pub(crate) async fn set_error_file(&self, file: CommitFile) {
        *self.error_file.lock().await = Some(file);
    }

    /// Fail an I/O-bound node once the saga deadline has passed
    pub(crate) fn ensure_not_cancelled(&self, node: &str) -> anyhow::Result<()> {
        if self.environment.cancellation.is_cancelled() {
            anyhow::bail!("Saga deadline passed before {} started", node);
        }
        Ok(())
    }
}

/// External collaborators the saga nodes use
#[derive(Clone)]
pub struct CompletionServices {
    pub stores: Stores,
    pub file_share: Arc<dyn FileShareService>,
    pub callback: Arc<dyn CallbackSink>,
    pub log_forwarder: LogForwarder,
}

/// The fixed, ordered completion pipeline
pub struct CompletionSaga {
    pipeline: Pipeline<CompletionContext>,
}

impl CompletionSaga {
    pub fn new(services: CompletionServices) -> Self {
        let pipeline = Pipeline::new("completion")
            .with_node(CreateErrorFileNode::new(services.file_share.clone()))
            .with_node(CommitFileShareBatchNode::new(services.file_share.clone()))
            .with_node(RecordFingerprintNode::new(services.stores.clone()))
            .with_node(WriteBuildMementoNode::new(services.stores.clone()))
            .with_node(ExpireSupersededBatchesNode::new(
                services.file_share,
                services.stores.clone(),
            ))
            .with_node(ReplayLogsNode::new(services.log_forwarder))
            .with_node(SendCallbackNode::new(services.callback))
            .with_node(CompleteJobNode::new(services.stores));

        Self { pipeline }
    }

    /// Node names in execution order
    pub fn node_names(&self) -> Vec<&'static str> {
        self.pipeline.node_names()
    }

    /// Run every node. The environment's token is cancelled if the saga
    /// outlives its configured deadline.
    #[instrument(skip(self, context), fields(job_id = %context.build.job_id, exit_code = %context.environment.builder_exit_code))]
    pub async fn run(&self, context: &CompletionContext) -> PipelineReport {
        let token = context.environment.cancellation.clone();
        let deadline = context.environment.config.saga_timeout();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(deadline_secs = deadline.as_secs(), "Completion saga deadline passed");
            token.cancel();
        });

        let report = self.pipeline.execute(context).await;
        timer.abort();

        info!(status = %report.status, "Completion saga finished");
        report
    }
}
