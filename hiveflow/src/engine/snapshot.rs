//! Point-in-time snapshots of a run's graph state.
//!
//! Written to the snapshot sink after every state change so external
//! observers (UI, progress reporting) can render the run without access to
//! the engine's in-memory state.

use super::job::JobExecution;
use crate::graph::EdgeKind;
use crate::state::ExecutionState;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One task's visible state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// The task identifier.
    pub task_id: Uuid,
    /// Batch position, `None` for ordinary nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// Recorded error, if the task failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One node's visible state with its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    /// The node name.
    pub node_name: String,
    /// The algorithm it runs.
    pub algorithm_name: String,
    /// Derived aggregate state.
    pub state: ExecutionState,
    /// Whether the node expanded from a batch reference.
    pub is_batch: bool,
    /// Per-task state, in batch order.
    pub tasks: Vec<TaskSnapshot>,
    /// Aggregate result once the node succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// One dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSnapshot {
    /// The producing node.
    pub source: String,
    /// The consuming node.
    pub target: String,
    /// How the consumer waits on the producer.
    pub kind: EdgeKind,
}

/// A full picture of one run at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    /// The job identifier.
    pub job_id: String,
    /// The pipeline name.
    pub pipeline_name: String,
    /// Per-node state, in definition order.
    pub nodes: Vec<NodeSnapshot>,
    /// The dependency edges.
    pub edges: Vec<EdgeSnapshot>,
    /// RFC 3339 capture time.
    pub timestamp: String,
}

impl GraphSnapshot {
    /// Captures the current state of a run.
    #[must_use]
    pub fn capture(job: &JobExecution) -> Self {
        let tracker = job.tracker();
        let nodes = job
            .graph()
            .node_names()
            .iter()
            .filter_map(|name| {
                let execution = tracker.node(name)?;
                let definition = job.descriptor().node(name)?;
                let state = execution.state();
                let result =
                    (state == ExecutionState::Succeed).then(|| execution.aggregate_result());
                Some(NodeSnapshot {
                    node_name: name.clone(),
                    algorithm_name: definition.algorithm_name.clone(),
                    state,
                    is_batch: execution.is_batch,
                    tasks: execution
                        .tasks()
                        .iter()
                        .map(|task| TaskSnapshot {
                            task_id: task.id,
                            batch_index: task.batch_index,
                            state: task.state,
                            error: task.error.clone(),
                        })
                        .collect(),
                    result,
                })
            })
            .collect();

        let edges = job
            .graph()
            .edges()
            .into_iter()
            .map(|(source, target, kind)| EdgeSnapshot {
                source: source.to_string(),
                target: target.to_string(),
                kind,
            })
            .collect();

        Self {
            job_id: job.job_id().to_string(),
            pipeline_name: job.descriptor().name.clone(),
            nodes,
            edges,
            timestamp: iso_timestamp(),
        }
    }

    /// Convenience lookup for tests and observers.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.node_name == name)
    }
}
