//! exset - Exchange-set build orchestrator
//!
//! Dispatches exchange-set builds to short-lived builder containers and
//! reconciles their results through a fixed completion saga.
//!
//! # Architecture
//!
//! Every job follows one sequence:
//! - A request is accepted and persisted as a `Created` job
//! - An output batch is created and a builder container dispatched
//! - When the builder exits (or times out), the completion saga runs every
//!   node in order, recording history and setting the terminal state
//!
//! # Modules
//!
//! - `adapters`: External collaborators (container runtime, file share, callbacks)
//! - `core`: Node engine, container orchestration, completion saga, log replay
//! - `domain`: Data structures (Job, Build, audit records)
//! - `store`: Key-value tables (in-memory and SQLite)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a build request
//! exset run request.json
//!
//! # Check a job
//! exset status <job-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::OrchestratorConfig;
pub use core::{JobOrchestrator, JobReport, Pipeline};
pub use domain::{Build, BuilderExitCode, Job, JobId, JobRequest, JobState, NodeResultStatus};
pub use store::Stores;
