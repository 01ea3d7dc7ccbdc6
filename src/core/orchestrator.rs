//! Job orchestrator.
//!
//! Drives one job end to end: create its output batch, dispatch the
//! builder container, then run the completion saga with the builder's
//! result. Many jobs may run at once; each job's sequence is independent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::adapters::{
    CallbackSink, CliContainerRuntime, ContainerRuntime, FileShareService, HttpCallbackSink,
    LocalFileShare,
};
use crate::config::OrchestratorConfig;
use crate::domain::{Build, BuildMemento, Job, JobId, JobRequest, JobState, NodeResultStatus};
use crate::store::entities::{JOB_ROW_KEY, MEMENTO_ROW_KEY};
use crate::store::Stores;

use super::completion::{
    CompletionContext, CompletionNodeEnvironment, CompletionSaga, CompletionServices, JobCompletion,
};
use super::container::{BuilderOutcome, BuilderRun, ContainerOrchestrator};
use super::log_forwarder::{LogForwarder, LogSink, TracingLogSink};
use super::node::PipelineReport;

/// What happened to one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub batch_id: Option<String>,
    pub builder: BuilderOutcome,
    pub final_state: JobState,
    pub saga: PipelineReport,
}

impl JobReport {
    pub fn saga_status(&self) -> NodeResultStatus {
        self.saga.status
    }
}

/// Collaborators for a [`JobOrchestrator`]
pub struct OrchestratorParts {
    pub stores: Stores,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub file_share: Arc<dyn FileShareService>,
    pub callback: Arc<dyn CallbackSink>,
    pub log_sink: Arc<dyn LogSink>,
}

/// Runs jobs from submission to terminal state
pub struct JobOrchestrator {
    config: Arc<OrchestratorConfig>,
    stores: Stores,
    file_share: Arc<dyn FileShareService>,
    containers: ContainerOrchestrator,
    saga: CompletionSaga,

    /// Completion signals of jobs someone is waiting on or running
    completions: Mutex<HashMap<JobId, JobCompletion>>,

    /// Jobs with a `run_job` call in flight
    running: StdMutex<HashSet<JobId>>,
}

/// Marks a job as running for as long as it is held
struct RunClaim<'a> {
    running: &'a StdMutex<HashSet<JobId>>,
    job_id: JobId,
}

impl<'a> RunClaim<'a> {
    /// `None` if another run of the same job holds the claim
    fn acquire(running: &'a StdMutex<HashSet<JobId>>, job_id: &JobId) -> Option<Self> {
        let mut claimed = running.lock().unwrap_or_else(|e| e.into_inner());
        if !claimed.insert(job_id.clone()) {
            return None;
        }

        Some(Self {
            running,
            job_id: job_id.clone(),
        })
    }
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

impl JobOrchestrator {
    pub fn new(config: OrchestratorConfig, parts: OrchestratorParts) -> Self {
        let config = Arc::new(config);
        let forwarder = LogForwarder::new(parts.log_sink, config.replay_level());

        let saga = CompletionSaga::new(CompletionServices {
            stores: parts.stores.clone(),
            file_share: parts.file_share.clone(),
            callback: parts.callback,
            log_forwarder: forwarder,
        });

        Self {
            containers: ContainerOrchestrator::new(parts.runtime, config.builder.clone()),
            config,
            stores: parts.stores,
            file_share: parts.file_share,
            saga,
            completions: Mutex::new(HashMap::new()),
            running: StdMutex::new(HashSet::new()),
        }
    }

    /// Orchestrator on the default local stack: SQLite tables and batches
    /// under the home directory, the configured container CLI, HTTP callbacks.
    pub async fn open(config: OrchestratorConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.home)
            .await
            .with_context(|| format!("Failed to create home directory: {}", config.home.display()))?;

        let stores = Stores::sqlite(&config.database_path()).context("Failed to open job database")?;
        let file_share = LocalFileShare::open(config.batches_dir()).await?;

        let parts = OrchestratorParts {
            stores,
            runtime: Arc::new(CliContainerRuntime::new(config.builder.runtime_binary.clone())),
            file_share: Arc::new(file_share),
            callback: Arc::new(HttpCallbackSink::new(config.callback_timeout())),
            log_sink: Arc::new(TracingLogSink),
        };

        Ok(Self::new(config, parts))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Saga node names in execution order
    pub fn saga_nodes(&self) -> Vec<&'static str> {
        self.saga.node_names()
    }

    /// Accept a request: persist the job in `Created` and its build
    #[instrument(skip(self, request), fields(data_standard = %request.data_standard))]
    pub async fn submit(&self, request: &JobRequest) -> Result<Job> {
        if request.products.is_empty() {
            anyhow::bail!("Request contains no products");
        }

        let job = Job::from_request(request);
        let build = Build::for_job(&job, request.products.clone());

        self.stores.jobs.add(&job).await.context("Failed to persist job")?;
        self.stores.builds.upsert(&build).await.context("Failed to persist build")?;

        info!(job_id = %job.id, correlation_id = %job.correlation_id, products = build.get_product_count(), "Job accepted");
        Ok(job)
    }

    /// Completion signal for a job
    pub async fn completion(&self, job_id: &JobId) -> JobCompletion {
        self.completions
            .lock()
            .await
            .entry(job_id.clone())
            .or_default()
            .clone()
    }

    /// Number of jobs with a live completion signal
    pub async fn pending_completions(&self) -> usize {
        self.completions.lock().await.len()
    }

    /// Wait until the job reaches a terminal state.
    ///
    /// Returns the stored state at once for a job that already finished,
    /// and `None` if a run ends without persisting a terminal state.
    pub async fn wait_for_completion(&self, job_id: &JobId) -> Result<Option<JobState>> {
        let completion = {
            // Held across the read so a finishing run cannot slip between them
            let mut completions = self.completions.lock().await;
            match completions.get(job_id) {
                Some(completion) => completion.clone(),
                None => {
                    let job = self
                        .get_job(job_id)
                        .await?
                        .with_context(|| format!("Unknown job {}", job_id))?;
                    if job.state.is_terminal() {
                        return Ok(Some(job.state));
                    }
                    if job.state != JobState::Created && !self.is_running(job_id) {
                        // A finished run that never stored a terminal state
                        return Ok(None);
                    }
                    completions.entry(job_id.clone()).or_default().clone()
                }
            }
        };

        Ok(completion.wait().await)
    }

    fn is_running(&self, job_id: &JobId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.stores.jobs.get(job_id.as_str(), JOB_ROW_KEY).await?)
    }

    pub async fn get_memento(&self, job_id: &JobId) -> Result<Option<BuildMemento>> {
        Ok(self.stores.mementos.get(job_id.as_str(), MEMENTO_ROW_KEY).await?)
    }

    /// Run a submitted job to its terminal state.
    ///
    /// Errors only when the job cannot be started at all (unknown, already
    /// run or running). Once the job is claimed, the saga always runs.
    #[instrument(skip(self, job_id), fields(job_id = %job_id))]
    pub async fn run_job(&self, job_id: &JobId) -> Result<JobReport> {
        let _claim = RunClaim::acquire(&self.running, job_id)
            .with_context(|| format!("Job {} is already running", job_id))?;

        let result = self.run_claimed(job_id).await;

        // Waiters keep their own receiver; the signal itself is not needed past this run
        self.completions.lock().await.remove(job_id);
        result
    }

    async fn run_claimed(&self, job_id: &JobId) -> Result<JobReport> {
        let mut job = self
            .get_job(job_id)
            .await?
            .with_context(|| format!("Unknown job {}", job_id))?;

        if job.state != JobState::Created {
            anyhow::bail!("Job {} is {}, only created jobs can run", job_id, job.state);
        }

        let row_key = job.data_standard.to_string();
        let mut build = self
            .stores
            .builds
            .get(job_id.as_str(), &row_key)
            .await?
            .with_context(|| format!("No build stored for job {}", job_id))?;

        let batch = match self
            .file_share
            .create_batch(job.data_standard, &job.correlation_id)
            .await
        {
            Ok(batch_id) => Some(batch_id),
            Err(e) => {
                error!(correlation_id = %job.correlation_id, error = %format!("{:#}", e), "Failed to create output batch");
                None
            }
        };

        // Without a batch the job never goes in progress; the saga fails it from Created
        let run = match batch {
            Some(batch_id) => {
                job.assign_batch(batch_id)?;
                job.transition_to(JobState::InProgress)?;
                self.stores.jobs.upsert(&job).await.context("Failed to persist job")?;
                self.containers.run_builder(&job).await
            }
            None => BuilderRun::not_started(
                ContainerOrchestrator::container_name(&job),
                "no output batch",
            ),
        };

        // The builder writes its results back into the build table
        match self.stores.builds.get(job_id.as_str(), &row_key).await {
            Ok(Some(reported)) => build.merge_builder_results(reported),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read builder results, using submitted build"),
        }
        if !run.logs.is_empty() {
            build.log_messages = run.logs.clone();
        }

        let environment = CompletionNodeEnvironment::new(Arc::clone(&self.config), run.exit_code);
        let completion = self.completion(job_id).await;
        let context = CompletionContext::new(job, build, environment, completion);

        let saga = self.saga.run(&context).await;

        if let Err(e) = self.stores.builds.upsert(&context.build).await {
            warn!(error = %e, "Failed to persist final build");
        }

        let job = context.job_snapshot().await;
        if !job.state.is_terminal() {
            warn!(state = %job.state, "Saga finished without a terminal job state");
        }

        info!(
            batch_id = ?job.batch_id,
            state = %job.state,
            saga_status = %saga.status,
            "Job finished"
        );

        Ok(JobReport {
            job_id: job.id,
            batch_id: job.batch_id,
            builder: run.outcome,
            final_state: job.state,
            saga,
        })
    }

    /// Run many jobs concurrently, at most `max_concurrent_jobs` at a time.
    /// Results are returned in input order.
    pub async fn run_jobs(self: &Arc<Self>, job_ids: Vec<JobId>) -> Vec<(JobId, Result<JobReport>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut handles = Vec::with_capacity(job_ids.len());

        for job_id in job_ids {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let id = job_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Job semaphore closed")?;
                this.run_job(&id).await
            });
            handles.push((job_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (job_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Job task panicked");
                    Err(anyhow::anyhow!("Job task failed: {}", e))
                }
            };
            results.push((job_id, result));
        }

        results
    }
}
