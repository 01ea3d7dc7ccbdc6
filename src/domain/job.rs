//! Job state and lifecycle.
//!
//! A Job represents one accepted exchange-set request. Jobs are never
//! deleted; their terminal state is set exactly once by the completion saga.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::build::Product;

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Product data standard family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataStandard {
    S57,
    S100,
}

impl DataStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S57 => "S57",
            Self::S100 => "S100",
        }
    }
}

impl std::fmt::Display for DataStandard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataStandard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "s57" => Ok(Self::S57),
            "s100" => Ok(Self::S100),
            other => Err(format!("unknown data standard: {}", other)),
        }
    }
}

/// Kind of exchange set requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeSetType {
    /// Every product in the requested scope; supersedes older complete sets
    Complete,

    /// Only the named products or updates
    Partial,
}

impl Default for ExchangeSetType {
    fn default() -> Self {
        Self::Complete
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Request accepted
    Created,

    /// Builder container dispatched
    InProgress,

    /// Completed successfully
    Completed,

    /// Builder or saga failed
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Created
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Rejected job mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("Invalid state transition for job {job_id}: {from} → {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Job {job_id} already has batch {existing}")]
    BatchAlreadyAssigned { job_id: JobId, existing: String },
}

/// An exchange-set request as submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub data_standard: DataStandard,

    /// Products with the edition/update resolved from the sales catalogue
    pub products: Vec<Product>,

    #[serde(default)]
    pub callback_uri: Option<String>,

    #[serde(default)]
    pub exchange_set_type: ExchangeSetType,

    /// Generated when not supplied
    #[serde(default)]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub sales_catalogue_timestamp: Option<DateTime<Utc>>,
}

impl JobRequest {
    /// Parse a request from JSON
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// One accepted exchange-set request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Output storage batch; assigned at most once
    pub batch_id: Option<String>,

    /// When the request was accepted
    pub timestamp: DateTime<Utc>,

    pub sales_catalogue_timestamp: Option<DateTime<Utc>>,

    pub state: JobState,

    pub data_standard: DataStandard,

    /// Names of the requested products
    pub requested_products: Vec<String>,

    pub callback_uri: Option<String>,

    pub exchange_set_type: ExchangeSetType,

    pub correlation_id: String,
}

impl Job {
    /// Create a job in the `Created` state
    pub fn new(
        id: JobId,
        data_standard: DataStandard,
        requested_products: Vec<String>,
        correlation_id: String,
    ) -> Self {
        Self {
            id,
            batch_id: None,
            timestamp: Utc::now(),
            sales_catalogue_timestamp: None,
            state: JobState::Created,
            data_standard,
            requested_products,
            callback_uri: None,
            exchange_set_type: ExchangeSetType::Complete,
            correlation_id,
        }
    }

    /// Create a job from a submitted request
    pub fn from_request(request: &JobRequest) -> Self {
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut job = Self::new(
            JobId::generate(),
            request.data_standard,
            request.products.iter().map(|p| p.name.clone()).collect(),
            correlation_id,
        );
        job.callback_uri = request.callback_uri.clone();
        job.exchange_set_type = request.exchange_set_type;
        job.sales_catalogue_timestamp = request.sales_catalogue_timestamp;
        job
    }

    /// Move to a later state. Backward moves and leaving a terminal state
    /// are rejected.
    pub fn transition_to(&mut self, next: JobState) -> Result<(), JobStateError> {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return Err(JobStateError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        Ok(())
    }

    /// Assign the output batch. A second assignment is rejected.
    pub fn assign_batch(&mut self, batch_id: impl Into<String>) -> Result<(), JobStateError> {
        if let Some(existing) = &self.batch_id {
            return Err(JobStateError::BatchAlreadyAssigned {
                job_id: self.id.clone(),
                existing: existing.clone(),
            });
        }

        self.batch_id = Some(batch_id.into());
        Ok(())
    }

    /// Watermark value used when this job supersedes earlier batches
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.sales_catalogue_timestamp.unwrap_or(self.timestamp)
    }
}
