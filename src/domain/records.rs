//! Audit records written by the completion saga.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::build::BuildNodeStatus;
use super::job::{DataStandard, JobId};
use super::status::BuilderExitCode;

/// Fingerprint of a successful build, keyed by discriminant hash.
///
/// Upserted; concurrent jobs for the same product set overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFingerprint {
    pub job_id: JobId,
    pub data_standard: DataStandard,
    pub batch_id: Option<String>,
    pub timestamp: DateTime<Utc>,

    /// Hash of the build's product discriminant
    pub discriminant: String,
}

/// Per-job history row, one per job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHistory {
    pub job_id: JobId,
    pub data_standard: DataStandard,
    pub batch_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub discriminant: String,
    pub builder_exit_code: BuilderExitCode,
}

/// Immutable snapshot of one builder run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMemento {
    pub job_id: JobId,
    pub builder_exit_code: BuilderExitCode,

    /// The builder's internal step statuses, verbatim
    pub builder_steps: Vec<BuildNodeStatus>,

    pub created_at: DateTime<Utc>,
}

/// Last successful complete-build watermark for a data standard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStandardTimestamp {
    pub data_standard: DataStandard,
    pub timestamp: DateTime<Utc>,
}
