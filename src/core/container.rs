//! Builder container orchestration.
//!
//! Launches one builder container per job, waits for it under a timeout,
//! captures its output and always removes it. Every run ends in exactly one
//! [`BuilderOutcome`]; the saga only sees the collapsed [`BuilderExitCode`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ContainerError, ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::config::BuilderSettings;
use crate::domain::{BuilderExitCode, Job};

/// Lifecycle of a builder container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Scheduled,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Removed,
}

/// How a builder run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuilderOutcome {
    /// Exited with code 0
    Succeeded,

    /// Exited with a non-zero code
    Failed { exit_code: i64 },

    /// Still running when the builder timeout elapsed
    TimedOut { after: Duration },

    /// Never reached `Running`
    StartFailed { reason: String },

    /// Started, but its status could not be observed
    WaitFailed { reason: String },
}

impl BuilderOutcome {
    /// Exit code handed to the completion saga
    pub fn exit_code(&self) -> BuilderExitCode {
        match self {
            Self::Succeeded => BuilderExitCode::Success,
            _ => BuilderExitCode::Failed,
        }
    }

    /// Terminal container state before removal
    pub fn final_state(&self) -> ContainerState {
        match self {
            Self::Succeeded => ContainerState::Succeeded,
            Self::TimedOut { .. } => ContainerState::TimedOut,
            _ => ContainerState::Failed,
        }
    }
}

/// Everything observed about one builder run
#[derive(Debug, Clone, Serialize)]
pub struct BuilderRun {
    pub container_name: String,
    pub outcome: BuilderOutcome,
    pub exit_code: BuilderExitCode,

    /// Captured stdout/stderr lines
    pub logs: Vec<String>,

    /// States passed through, in order
    pub states: Vec<ContainerState>,
}

impl BuilderRun {
    /// A run that was never attempted
    pub fn not_started(container_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let outcome = BuilderOutcome::StartFailed {
            reason: reason.into(),
        };
        Self {
            container_name: container_name.into(),
            exit_code: outcome.exit_code(),
            outcome,
            logs: Vec::new(),
            states: vec![ContainerState::Scheduled, ContainerState::Failed],
        }
    }

    pub fn was_removed(&self) -> bool {
        self.states.last() == Some(&ContainerState::Removed)
    }
}

/// Owns a started container until it is removed.
///
/// `release` removes it explicitly; if the lease is dropped while still
/// holding the handle (cancelled or panicking run), removal is spawned on
/// the current runtime.
struct ContainerLease {
    runtime: Arc<dyn ContainerRuntime>,
    handle: Option<ContainerHandle>,
}

impl ContainerLease {
    fn new(runtime: Arc<dyn ContainerRuntime>, handle: ContainerHandle) -> Self {
        Self {
            runtime,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Remove the container. Calling again is a no-op.
    async fn release(&mut self) -> Result<(), ContainerError> {
        match self.handle.take() {
            Some(handle) => self.runtime.remove(&handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = Arc::clone(&self.runtime);
                rt.spawn(async move {
                    if let Err(e) = runtime.remove(&handle).await {
                        warn!(container = %handle.name, error = %e, "Failed to remove container on drop");
                    }
                });
            }
            Err(_) => {
                warn!(container = %handle.name, "No runtime available, container left behind");
            }
        }
    }
}

/// Runs builder containers for jobs
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    settings: BuilderSettings,
}

impl ContainerOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: BuilderSettings) -> Self {
        Self { runtime, settings }
    }

    /// Container name for a job
    pub fn container_name(job: &Job) -> String {
        format!("exset-builder-{}", job.id)
    }

    /// What to launch for a job
    pub fn container_spec(&self, job: &Job) -> ContainerSpec {
        ContainerSpec {
            name: Self::container_name(job),
            image: self.settings.image.clone(),
            env: vec![
                ("JOB_ID".to_string(), job.id.to_string()),
                ("BATCH_ID".to_string(), job.batch_id.clone().unwrap_or_default()),
                ("CORRELATION_ID".to_string(), job.correlation_id.clone()),
                ("STORAGE_ADDRESS".to_string(), self.settings.storage_address.clone()),
            ],
        }
    }

    /// Run the builder for a job to completion.
    ///
    /// Never fails: every problem becomes a [`BuilderOutcome`], and the
    /// container is removed whatever happened.
    #[instrument(skip(self, job), fields(job_id = %job.id, batch_id = ?job.batch_id, runtime = self.runtime.name()))]
    pub async fn run_builder(&self, job: &Job) -> BuilderRun {
        let spec = self.container_spec(job);
        let mut states = vec![ContainerState::Scheduled];

        let start_timeout = self.settings.start_timeout();
        let started = tokio::time::timeout(start_timeout, self.runtime.start(&spec)).await;

        let handle = match started {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                error!(event = "builder.start_failed", container = %spec.name, error = %e, "Builder container failed to start");
                states.push(ContainerState::Failed);
                self.remove_by_name(&spec.name).await;
                return self.finish_without_container(spec.name, e.to_string(), states);
            }
            Err(_) => {
                error!(
                    event = "builder.start_failed",
                    container = %spec.name,
                    timeout_secs = start_timeout.as_secs(),
                    "Builder container was not started in time"
                );
                states.push(ContainerState::Failed);
                self.remove_by_name(&spec.name).await;

                let reason = format!("not started within {:?}", start_timeout);
                return self.finish_without_container(spec.name, reason, states);
            }
        };

        info!(container = %handle.name, id = %handle.id, "Builder container running");
        states.push(ContainerState::Running);
        let mut lease = ContainerLease::new(Arc::clone(&self.runtime), handle.clone());

        let timeout = self.settings.timeout();
        let poll_interval = self.settings.poll_interval();

        // Bounded here as well, whatever the runtime's own wait does
        let waited = tokio::time::timeout(
            timeout + poll_interval,
            self.runtime.wait(&handle, timeout, poll_interval),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ContainerError::TimedOut {
                id: handle.id.clone(),
                after: timeout,
            })
        });

        let outcome = match waited {
            Ok(exit) if exit.exit_code == 0 => {
                info!(event = "builder.succeeded", container = %handle.name, "Builder container succeeded");
                BuilderOutcome::Succeeded
            }
            Ok(exit) => {
                warn!(
                    event = "builder.failed",
                    container = %handle.name,
                    exit_code = exit.exit_code,
                    "Builder container exited with failure"
                );
                BuilderOutcome::Failed {
                    exit_code: exit.exit_code,
                }
            }
            Err(ContainerError::TimedOut { after, .. }) => {
                error!(
                    event = "builder.timed_out",
                    container = %handle.name,
                    timeout_secs = after.as_secs(),
                    "Builder container timed out"
                );
                BuilderOutcome::TimedOut { after }
            }
            Err(e) => {
                error!(event = "builder.wait_failed", container = %handle.name, error = %e, "Failed to observe builder container");
                BuilderOutcome::WaitFailed {
                    reason: e.to_string(),
                }
            }
        };
        states.push(outcome.final_state());

        // Capture output before removal
        let logs = match lease.handle() {
            Some(h) => match self.runtime.logs(h).await {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(container = %handle.name, error = %e, "Failed to capture builder logs");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        match lease.release().await {
            Ok(()) => {
                debug!(container = %handle.name, "Builder container removed");
                states.push(ContainerState::Removed);
            }
            Err(e) => {
                warn!(event = "builder.remove_failed", container = %handle.name, error = %e, "Failed to remove builder container");
            }
        }

        BuilderRun {
            container_name: handle.name,
            exit_code: outcome.exit_code(),
            outcome,
            logs,
            states,
        }
    }

    /// A failed or abandoned start may still have created the container
    async fn remove_by_name(&self, name: &str) {
        let orphan = ContainerHandle {
            id: name.to_string(),
            name: name.to_string(),
        };
        if let Err(e) = self.runtime.remove(&orphan).await {
            debug!(container = %name, error = %e, "No container to remove after failed start");
        }
    }

    fn finish_without_container(
        &self,
        container_name: String,
        reason: String,
        states: Vec<ContainerState>,
    ) -> BuilderRun {
        let outcome = BuilderOutcome::StartFailed { reason };
        BuilderRun {
            container_name,
            exit_code: outcome.exit_code(),
            outcome,
            logs: Vec::new(),
            states,
        }
    }
}
