//! Node pipeline engine.
//!
//! A [`Node`] is one unit of work over a shared context. [`execute_node`] is
//! the only way a node is run: it checks applicability, then performs the
//! work inside a failure boundary that turns errors and panics into
//! [`NodeResultStatus::Failed`].
//!
//! A [`Pipeline`] runs its nodes strictly in order and unconditionally. A
//! failed node never stops later nodes and nothing is rolled back.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::NodeResultStatus;

/// A unit of work over a context `C`
#[async_trait]
pub trait Node<C: Sync>: Send + Sync {
    /// Stable node name used in logs and reports
    fn name(&self) -> &'static str;

    /// Cheap, side-effect-free applicability check
    async fn should_execute(&self, _context: &C) -> bool {
        true
    }

    /// The node's work. Errors are caught by [`execute_node`].
    async fn perform_execute(&self, context: &C) -> Result<NodeResultStatus>;
}

/// Run one node: gate, then work inside the failure boundary.
pub async fn execute_node<C: Sync>(node: &dyn Node<C>, context: &C) -> NodeResultStatus {
    let name = node.name();

    let run = async {
        if !node.should_execute(context).await {
            debug!(node = name, "Node not applicable, skipping");
            return Ok(NodeResultStatus::NotRun);
        }
        node.perform_execute(context).await
    };

    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!(node = name, error = %format!("{:#}", e), "Node failed");
            NodeResultStatus::Failed
        }
        Err(panic) => {
            error!(node = name, panic = %panic_message(panic.as_ref()), "Node panicked");
            NodeResultStatus::Failed
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of one node within a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    pub node: &'static str,
    pub status: NodeResultStatus,
    pub duration_ms: u64,
}

/// Outcome of a pipeline run, for reporting only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub results: Vec<NodeResult>,

    /// Worst status observed
    pub status: NodeResultStatus,
}

impl PipelineReport {
    /// Status of a named node, if it is part of the pipeline
    pub fn status_of(&self, node: &str) -> Option<NodeResultStatus> {
        self.results
            .iter()
            .find(|r| r.node == node)
            .map(|r| r.status)
    }
}

/// An ordered list of nodes sharing one context
pub struct Pipeline<C: Sync> {
    name: String,
    nodes: Vec<Box<dyn Node<C>>>,
}

impl<C: Sync> Pipeline<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Append a node (builder style)
    pub fn with_node<N: Node<C> + 'static>(mut self, node: N) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    /// Append a boxed node
    pub fn push(&mut self, node: Box<dyn Node<C>>) {
        self.nodes.push(node);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node names in execution order
    pub fn node_names(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Run every node in declaration order, regardless of earlier results.
    pub async fn execute(&self, context: &C) -> PipelineReport {
        let mut results = Vec::with_capacity(self.nodes.len());
        let mut overall = NodeResultStatus::NotRun;

        for node in &self.nodes {
            let started = Instant::now();
            let status = execute_node(node.as_ref(), context).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match status {
                NodeResultStatus::Failed => {
                    warn!(node = node.name(), duration_ms, "Node finished with failure, continuing")
                }
                NodeResultStatus::NotRun => {}
                _ => debug!(node = node.name(), %status, duration_ms, "Node finished"),
            }

            overall = overall.worst(status);
            results.push(NodeResult {
                node: node.name(),
                status,
                duration_ms,
            });
        }

        info!(pipeline = %self.name, status = %overall, "Pipeline finished");

        PipelineReport {
            pipeline: self.name.clone(),
            results,
            status: overall,
        }
    }
}
