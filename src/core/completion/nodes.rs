//! The eight completion nodes, in saga order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::adapters::{CallbackPayload, CallbackSink, FileShareService};
use crate::core::fingerprint::build_fingerprint;
use crate::core::log_forwarder::LogForwarder;
use crate::core::node::{panic_message, Node};
use crate::domain::{
    BuildFingerprint, BuildMemento, BuilderExitCode, DataStandardTimestamp, ExchangeSetType,
    JobHistory, JobId, JobState, NodeResultStatus,
};
use crate::store::Stores;

use super::CompletionContext;

pub const ERROR_FILE_NAME: &str = "error.txt";
const ERROR_FILE_CONTENT_TYPE: &str = "text/plain";

/// Text of the error file written into a failed build's batch
pub fn error_file_text(job_id: &JobId, correlation_id: &str) -> String {
    format!(
        "There has been a problem in creating your exchange set, so we are unable to fulfil \
         your request at this time. Please contact customer services quoting job {} and \
         correlation ID {}",
        job_id, correlation_id
    )
}

// ============================================================================
// 1. Error file
// ============================================================================

/// Writes a support-contact text file into the batch of a failed build
pub struct CreateErrorFileNode {
    file_share: Arc<dyn FileShareService>,
}

impl CreateErrorFileNode {
    pub fn new(file_share: Arc<dyn FileShareService>) -> Self {
        Self { file_share }
    }
}

#[async_trait]
impl Node<CompletionContext> for CreateErrorFileNode {
    fn name(&self) -> &'static str {
        "create_error_file"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        ctx.batch_id().await.is_some() && ctx.environment.builder_exit_code == BuilderExitCode::Failed
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        ctx.ensure_not_cancelled(self.name())?;

        let job = ctx.job_snapshot().await;
        let batch_id = job.batch_id.as_deref().context("Job has no batch")?;
        let text = error_file_text(&job.id, &job.correlation_id);

        let file = self
            .file_share
            .add_file_to_batch(
                batch_id,
                text.as_bytes(),
                ERROR_FILE_NAME,
                ERROR_FILE_CONTENT_TYPE,
                &job.correlation_id,
            )
            .await
            .with_context(|| format!("Failed to write error file to batch {} for job {}", batch_id, job.id))?;

        info!(job_id = %job.id, batch_id, correlation_id = %job.correlation_id, "Error file written");
        ctx.set_error_file(file).await;

        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 2. Commit
// ============================================================================

/// Commits the output batch with the error file or the builder's first file
pub struct CommitFileShareBatchNode {
    file_share: Arc<dyn FileShareService>,
}

impl CommitFileShareBatchNode {
    pub fn new(file_share: Arc<dyn FileShareService>) -> Self {
        Self { file_share }
    }
}

#[async_trait]
impl Node<CompletionContext> for CommitFileShareBatchNode {
    fn name(&self) -> &'static str {
        "commit_file_share_batch"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        ctx.batch_id().await.is_some()
            && (ctx.environment.is_success() || ctx.error_file_created().await)
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        ctx.ensure_not_cancelled(self.name())?;

        let job = ctx.job_snapshot().await;
        let batch_id = job.batch_id.as_deref().context("Job has no batch")?;

        let file = match ctx.error_file().await {
            Some(error_file) => Some(error_file),
            None => ctx.build.first_commit_file().cloned(),
        };
        let files: Vec<_> = file.into_iter().collect();

        self.file_share
            .commit_batch(batch_id, &files, &job.correlation_id)
            .await
            .with_context(|| format!("Failed to commit batch {} for job {}", batch_id, job.id))?;

        if files.is_empty() {
            warn!(job_id = %job.id, batch_id, "Batch committed without any output file");
            return Ok(NodeResultStatus::SucceededWithErrors);
        }

        info!(job_id = %job.id, batch_id, file = %files[0].file_name, "Batch committed");
        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 3. Fingerprint and history
// ============================================================================

/// Records job history and, for successful builds, the build fingerprint.
///
/// Upserts only: two jobs for the same product set may both write.
pub struct RecordFingerprintNode {
    stores: Stores,
}

impl RecordFingerprintNode {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Node<CompletionContext> for RecordFingerprintNode {
    fn name(&self) -> &'static str {
        "record_fingerprint"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        ctx.environment.config.saga.deduplication_enabled
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        ctx.ensure_not_cancelled(self.name())?;

        let job = ctx.job_snapshot().await;
        let exit_code = ctx.environment.builder_exit_code;
        let discriminant = build_fingerprint(&ctx.build);
        let now = Utc::now();

        let history = JobHistory {
            job_id: job.id.clone(),
            data_standard: job.data_standard,
            batch_id: job.batch_id.clone(),
            timestamp: now,
            discriminant: discriminant.clone(),
            builder_exit_code: exit_code,
        };
        self.stores
            .histories
            .upsert(&history)
            .await
            .with_context(|| format!("Failed to record history for job {}", job.id))?;

        if exit_code.is_success() {
            let fingerprint = BuildFingerprint {
                job_id: job.id.clone(),
                data_standard: job.data_standard,
                batch_id: job.batch_id.clone(),
                timestamp: now,
                discriminant: discriminant.clone(),
            };
            self.stores
                .fingerprints
                .upsert(&fingerprint)
                .await
                .with_context(|| format!("Failed to record fingerprint for job {}", job.id))?;
        }

        debug!(job_id = %job.id, %discriminant, "Fingerprint recorded");
        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 4. Memento
// ============================================================================

/// Persists the builder result snapshot; fails the job on a non-success exit
pub struct WriteBuildMementoNode {
    stores: Stores,
}

impl WriteBuildMementoNode {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Node<CompletionContext> for WriteBuildMementoNode {
    fn name(&self) -> &'static str {
        "write_build_memento"
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        let exit_code = ctx.environment.builder_exit_code;
        let memento = BuildMemento {
            job_id: ctx.build.job_id.clone(),
            builder_exit_code: exit_code,
            builder_steps: ctx.build.statuses.clone(),
            created_at: Utc::now(),
        };

        // Written once; a second write for the same job is an error
        let written = self.stores.mementos.add(&memento).await;

        if !exit_code.is_success() {
            // The context only moves once the stored row has
            let mut job = ctx.job_snapshot().await;
            job.transition_to(JobState::Failed)?;
            self.stores
                .jobs
                .upsert(&job)
                .await
                .with_context(|| format!("Failed to persist failed state for job {}", job.id))?;

            warn!(job_id = %job.id, batch_id = ?job.batch_id, "Job failed");
            *ctx.job.write().await = job;
            ctx.completion.signal(JobState::Failed);
        }

        written.with_context(|| format!("Failed to write memento for job {}", memento.job_id))?;
        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 5. Expiry
// ============================================================================

/// Expires batches superseded by a successful complete exchange set
pub struct ExpireSupersededBatchesNode {
    file_share: Arc<dyn FileShareService>,
    stores: Stores,
}

impl ExpireSupersededBatchesNode {
    pub fn new(file_share: Arc<dyn FileShareService>, stores: Stores) -> Self {
        Self { file_share, stores }
    }
}

#[async_trait]
impl Node<CompletionContext> for ExpireSupersededBatchesNode {
    fn name(&self) -> &'static str {
        "expire_superseded_batches"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        let job = ctx.job.read().await;
        ctx.environment.is_success()
            && job.exchange_set_type == ExchangeSetType::Complete
            && job.batch_id.is_some()
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        ctx.ensure_not_cancelled(self.name())?;

        let job = ctx.job_snapshot().await;
        let batch_id = job.batch_id.as_deref().context("Job has no batch")?;

        let superseded = self
            .file_share
            .search_committed_batches_excluding_current(batch_id, &job.correlation_id)
            .await
            .with_context(|| format!("Failed to search batches superseded by {}", batch_id))?;

        if !superseded.is_empty() {
            self.file_share
                .set_expiry_date(&superseded, &job.correlation_id)
                .await
                .with_context(|| format!("Failed to expire {} batches", superseded.len()))?;
        }

        let watermark = DataStandardTimestamp {
            data_standard: job.data_standard,
            timestamp: job.effective_timestamp(),
        };
        self.stores
            .timestamps
            .upsert(&watermark)
            .await
            .context("Failed to advance data standard timestamp")?;

        info!(job_id = %job.id, batch_id, expired = superseded.len(), "Superseded batches expired");
        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 6. Log replay
// ============================================================================

/// Replays the builder's captured logs whatever the outcome
pub struct ReplayLogsNode {
    forwarder: LogForwarder,
}

impl ReplayLogsNode {
    pub fn new(forwarder: LogForwarder) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl Node<CompletionContext> for ReplayLogsNode {
    fn name(&self) -> &'static str {
        "replay_logs"
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        let build = &ctx.build;
        let forwarded =
            self.forwarder
                .forward_logs(&build.log_messages, build.data_standard(), &build.job_id);

        let dropped = build
            .log_messages
            .iter()
            .filter(|l| !l.trim().is_empty())
            .count()
            .saturating_sub(forwarded);

        debug!(job_id = %build.job_id, forwarded, dropped, "Builder logs replayed");
        Ok(NodeResultStatus::Succeeded)
    }
}

// ============================================================================
// 7. Callback
// ============================================================================

/// Notifies the caller. Never fails: delivery problems are downgraded.
pub struct SendCallbackNode {
    sink: Arc<dyn CallbackSink>,
}

impl SendCallbackNode {
    pub fn new(sink: Arc<dyn CallbackSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Node<CompletionContext> for SendCallbackNode {
    fn name(&self) -> &'static str {
        "send_callback"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        let job = ctx.job.read().await;
        job.callback_uri.is_some() && job.batch_id.is_some() && ctx.environment.is_success()
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        let job = ctx.job_snapshot().await;
        let (Some(uri), Some(batch_id)) = (job.callback_uri.clone(), job.batch_id.clone()) else {
            return Ok(NodeResultStatus::NotRun);
        };

        if ctx.environment.cancellation.is_cancelled() {
            warn!(job_id = %job.id, "Saga deadline passed, callback not sent");
            return Ok(NodeResultStatus::SucceededWithErrors);
        }

        let payload = CallbackPayload {
            job_id: job.id.clone(),
            batch_id,
            correlation_id: job.correlation_id.clone(),
            data_standard: job.data_standard,
            exchange_set_product_count: ctx.build.get_product_count(),
            products: ctx.build.get_product_delimited_list(),
            completed_at: Utc::now(),
        };

        let send = self.sink.post(&uri, &payload, &ctx.environment.cancellation);

        match AssertUnwindSafe(send).catch_unwind().await {
            Ok(Ok(())) => {
                info!(job_id = %job.id, callback_uri = %uri, "Callback sent");
                Ok(NodeResultStatus::Succeeded)
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.id, callback_uri = %uri, error = %format!("{:#}", e), "Callback failed");
                Ok(NodeResultStatus::SucceededWithErrors)
            }
            Err(panic) => {
                warn!(job_id = %job.id, callback_uri = %uri, panic = %panic_message(panic.as_ref()), "Callback panicked");
                Ok(NodeResultStatus::SucceededWithErrors)
            }
        }
    }
}

// ============================================================================
// 8. Completion
// ============================================================================

/// Marks a successful job `Completed` and wakes waiters
pub struct CompleteJobNode {
    stores: Stores,
}

impl CompleteJobNode {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Node<CompletionContext> for CompleteJobNode {
    fn name(&self) -> &'static str {
        "complete_job"
    }

    async fn should_execute(&self, ctx: &CompletionContext) -> bool {
        ctx.environment.builder_exit_code != BuilderExitCode::Failed
    }

    async fn perform_execute(&self, ctx: &CompletionContext) -> Result<NodeResultStatus> {
        let mut job = ctx.job_snapshot().await;
        job.transition_to(JobState::Completed)?;

        self.stores
            .jobs
            .upsert(&job)
            .await
            .with_context(|| format!("Failed to persist completed state for job {}", job.id))?;

        info!(job_id = %job.id, batch_id = ?job.batch_id, "Job completed");
        *ctx.job.write().await = job;
        ctx.completion.signal(JobState::Completed);

        Ok(NodeResultStatus::Succeeded)
    }
}
