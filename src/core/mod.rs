//! Core orchestration logic.
//!
//! This module contains:
//! - Node: the node/pipeline execution engine
//! - Fingerprint: product-set hashing
//! - Container: builder container lifecycle
//! - Completion: the post-build saga
//! - LogForwarder: builder log replay
//! - Orchestrator: end-to-end job execution

pub mod completion;
pub mod container;
pub mod fingerprint;
pub mod log_forwarder;
pub mod node;
pub mod orchestrator;

// Re-export commonly used types
pub use completion::{
    CompletionContext, CompletionNodeEnvironment, CompletionSaga, CompletionServices, JobCompletion,
};
pub use container::{BuilderOutcome, BuilderRun, ContainerOrchestrator, ContainerState};
pub use fingerprint::{build_fingerprint, calculate_hash};
pub use log_forwarder::{BuilderLogRecord, LogForwarder, LogSink, TracingLogSink};
pub use node::{execute_node, Node, NodeResult, Pipeline, PipelineReport};
pub use orchestrator::{JobOrchestrator, JobReport, OrchestratorParts};
