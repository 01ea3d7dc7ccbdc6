//! Domain types for the exchange-set orchestrator.
//!
//! This module contains the core data structures:
//! - Job: an accepted request and its lifecycle state
//! - Build: the product set and builder artifacts for a job
//! - Records: fingerprints, history, mementos and watermarks
//! - Status: node and builder result enums

pub mod build;
pub mod job;
pub mod records;
pub mod status;

// Re-export commonly used types
pub use build::{Build, BuildKind, BuildNodeStatus, CommitFile, Product};
pub use job::{DataStandard, ExchangeSetType, Job, JobId, JobRequest, JobState, JobStateError};
pub use records::{BuildFingerprint, BuildMemento, DataStandardTimestamp, JobHistory};
pub use status::{BuilderExitCode, NodeResultStatus};
