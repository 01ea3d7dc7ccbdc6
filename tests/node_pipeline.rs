//! Node Pipeline Integration Tests
//!
//! Tests for node isolation and unconditional, ordered pipeline execution.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use exset::core::{execute_node, Node, Pipeline};
use exset::domain::NodeResultStatus;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<&'static str>>,
}

impl Recorder {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Error,
    Panic,
}

struct Step {
    name: &'static str,
    behaviour: Behaviour,
}

#[async_trait]
impl Node<Recorder> for Step {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn perform_execute(&self, ctx: &Recorder) -> Result<NodeResultStatus> {
        ctx.calls.lock().unwrap().push(self.name);
        match self.behaviour {
            Behaviour::Succeed => Ok(NodeResultStatus::Succeeded),
            Behaviour::Error => anyhow::bail!("{} failed", self.name),
            Behaviour::Panic => panic!("{} exploded", self.name),
        }
    }
}

const NAMES: [&str; 8] = [
    "create_error_file",
    "commit_file_share_batch",
    "record_fingerprint",
    "write_build_memento",
    "expire_superseded_batches",
    "replay_logs",
    "send_callback",
    "complete_job",
];

fn pipeline_with(faulty: Option<(usize, Behaviour)>) -> Pipeline<Recorder> {
    let mut pipeline = Pipeline::new("totality");
    for (i, name) in NAMES.iter().copied().enumerate() {
        let behaviour = match faulty {
            Some((index, b)) if index == i => b,
            _ => Behaviour::Succeed,
        };
        pipeline.push(Box::new(Step { name, behaviour }));
    }
    pipeline
}

#[tokio::test]
async fn test_error_becomes_failed() {
    let ctx = Recorder::default();
    let node = Step {
        name: "erroring",
        behaviour: Behaviour::Error,
    };

    assert_eq!(execute_node(&node, &ctx).await, NodeResultStatus::Failed);
    assert_eq!(ctx.calls(), vec!["erroring"]);
}

#[tokio::test]
async fn test_panic_becomes_failed() {
    let ctx = Recorder::default();
    let node = Step {
        name: "panicking",
        behaviour: Behaviour::Panic,
    };

    assert_eq!(execute_node(&node, &ctx).await, NodeResultStatus::Failed);
}

#[tokio::test]
async fn test_all_nodes_run_in_order() {
    let ctx = Recorder::default();
    let report = pipeline_with(None).execute(&ctx).await;

    assert_eq!(ctx.calls(), NAMES.to_vec());
    assert_eq!(report.status, NodeResultStatus::Succeeded);
    assert_eq!(report.results.len(), 8);
}

#[tokio::test]
async fn test_any_single_failure_does_not_stop_the_pipeline() {
    for behaviour in [Behaviour::Error, Behaviour::Panic] {
        for faulty in 0..NAMES.len() {
            let ctx = Recorder::default();
            let report = pipeline_with(Some((faulty, behaviour))).execute(&ctx).await;

            assert_eq!(ctx.calls(), NAMES.to_vec(), "faulty node {}", NAMES[faulty]);
            assert_eq!(report.status, NodeResultStatus::Failed);

            for (i, result) in report.results.iter().enumerate() {
                let expected = if i == faulty {
                    NodeResultStatus::Failed
                } else {
                    NodeResultStatus::Succeeded
                };
                assert_eq!(result.status, expected, "node {}", result.node);
            }
        }
    }
}
