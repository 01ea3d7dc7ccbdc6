//! Result statuses shared by the node engine, the builder and the saga.

use serde::{Deserialize, Serialize};

/// Outcome of a single pipeline node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResultStatus {
    /// The node's applicability check returned false
    NotRun,

    /// The node did its work
    Succeeded,

    /// The node did its work but something non-essential went wrong
    SucceededWithErrors,

    /// The node's work failed (error or panic)
    Failed,
}

impl NodeResultStatus {
    /// Severity used to pick the worst status of a pipeline.
    ///
    /// `NotRun` and `Succeeded` rank equally.
    fn severity(self) -> u8 {
        match self {
            Self::NotRun | Self::Succeeded => 0,
            Self::SucceededWithErrors => 1,
            Self::Failed => 2,
        }
    }

    /// Combine two statuses, keeping the worse one.
    ///
    /// Between equally ranked statuses `Succeeded` wins over `NotRun`, so a
    /// pipeline that did any work reports `Succeeded`.
    pub fn worst(self, other: Self) -> Self {
        match self.severity().cmp(&other.severity()) {
            std::cmp::Ordering::Greater => self,
            std::cmp::Ordering::Less => other,
            std::cmp::Ordering::Equal => {
                if self == Self::Succeeded || other == Self::Succeeded {
                    Self::Succeeded
                } else {
                    self
                }
            }
        }
    }

    pub fn is_failed(self) -> bool {
        self == Self::Failed
    }
}

impl Default for NodeResultStatus {
    fn default() -> Self {
        Self::NotRun
    }
}

impl std::fmt::Display for NodeResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRun => write!(f, "not_run"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithErrors => write!(f, "succeeded_with_errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Exit code of a builder container run, as seen by the completion saga.
///
/// Timeouts and start failures collapse into `Failed` here; the container
/// orchestrator keeps the finer-grained outcome for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderExitCode {
    Success,
    Failed,
}

impl BuilderExitCode {
    /// Map a raw process exit code
    pub fn from_process_code(code: i64) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Failed
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for BuilderExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
