//! Error types for the hiveflow engine.
//!
//! Build-time errors (cycles, duplicate names, invalid input shapes) abort
//! pipeline construction before any task is dispatched. Runtime errors are
//! local to a node/task and escalate according to the node's failure policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for hiveflow operations.
#[derive(Debug, Error)]
pub enum HiveflowError {
    /// A node's input mixes references in a way the engine cannot schedule.
    #[error("{0}")]
    InvalidNodeInput(#[from] InvalidNodeInputError),

    /// A cycle was detected while building the dependency graph.
    #[error("{0}")]
    CyclicGraph(#[from] CyclicGraphError),

    /// A strict reference could not be resolved.
    #[error("{0}")]
    UnresolvedReference(#[from] UnresolvedReferenceError),

    /// Two nodes in one pipeline share a name.
    #[error("{0}")]
    DuplicateNodeName(#[from] DuplicateNodeNameError),

    /// A worker reported an algorithm-level failure for a task.
    #[error("{0}")]
    TaskFailed(#[from] TaskFailedError),

    /// The pipeline source had no definition for the requested job.
    #[error("pipeline not found for job '{job_id}'")]
    PipelineNotFound {
        /// The job identifier that was looked up.
        job_id: String,
    },

    /// A large-value storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error raised when a node's input is structurally invalid.
///
/// Detected at graph-build time, never at runtime: a batch-collection
/// reference combined with a wait-any reference, more than one batch
/// dimension, or a reference to a node that does not exist.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("invalid input for node '{node}': {reason}")]
pub struct InvalidNodeInputError {
    /// The offending node.
    pub node: String,
    /// What makes the input invalid.
    pub reason: String,
}

impl InvalidNodeInputError {
    /// Creates a new invalid node input error.
    #[must_use]
    pub fn new(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the resolved dependency graph contains a cycle.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("cyclic pipeline graph: {}", cycle_path.join(" -> "))]
pub struct CyclicGraphError {
    /// The node names forming the cycle, first node repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CyclicGraphError {
    /// Creates a new cyclic graph error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Error raised when a strict reference cannot be resolved.
///
/// Fatal for the affected task only; propagated as a task failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("unresolved reference '{reference}' in node '{node}'")]
pub struct UnresolvedReferenceError {
    /// The reference string that failed to resolve.
    pub reference: String,
    /// The node whose input contains the reference.
    pub node: String,
}

impl UnresolvedReferenceError {
    /// Creates a new unresolved reference error.
    #[must_use]
    pub fn new(reference: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            node: node.into(),
        }
    }
}

/// Error raised when two nodes in a pipeline share a name.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("duplicate node name '{node}' in pipeline")]
pub struct DuplicateNodeNameError {
    /// The duplicated node name.
    pub node: String,
}

impl DuplicateNodeNameError {
    /// Creates a new duplicate node name error.
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

/// A worker-reported task failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("task failed in node '{node}'{}: {message}", task_index.map(|i| format!(" [{i}]")).unwrap_or_default())]
pub struct TaskFailedError {
    /// The owning node.
    pub node: String,
    /// Batch index of the failed task, if the node is a batch node.
    pub task_index: Option<usize>,
    /// The worker's error message.
    pub message: String,
}

impl TaskFailedError {
    /// Creates a new task failure error.
    #[must_use]
    pub fn new(
        node: impl Into<String>,
        task_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            task_index,
            message: message.into(),
        }
    }
}

impl HiveflowError {
    /// Returns true for errors that abort pipeline construction entirely.
    #[must_use]
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidNodeInput(_) | Self::CyclicGraph(_) | Self::DuplicateNodeName(_)
        )
    }

    /// Converts to a structured dictionary for status APIs.
    ///
    /// Callers render these without re-parsing free text; every variant
    /// carries a `kind`, a `message`, and the offending identifiers.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::InvalidNodeInput(e) => {
                map.insert("kind".to_string(), serde_json::json!("InvalidNodeInput"));
                map.insert("node".to_string(), serde_json::json!(e.node));
                map.insert("reason".to_string(), serde_json::json!(e.reason));
            }
            Self::CyclicGraph(e) => {
                map.insert("kind".to_string(), serde_json::json!("CyclicGraph"));
                map.insert("cycle".to_string(), serde_json::json!(e.cycle_path));
            }
            Self::UnresolvedReference(e) => {
                map.insert("kind".to_string(), serde_json::json!("UnresolvedReference"));
                map.insert("reference".to_string(), serde_json::json!(e.reference));
                map.insert("node".to_string(), serde_json::json!(e.node));
            }
            Self::DuplicateNodeName(e) => {
                map.insert("kind".to_string(), serde_json::json!("DuplicateNodeName"));
                map.insert("node".to_string(), serde_json::json!(e.node));
            }
            Self::TaskFailed(e) => {
                map.insert("kind".to_string(), serde_json::json!("TaskFailed"));
                map.insert("node".to_string(), serde_json::json!(e.node));
                map.insert("task_index".to_string(), serde_json::json!(e.task_index));
                map.insert("error".to_string(), serde_json::json!(e.message));
            }
            Self::PipelineNotFound { job_id } => {
                map.insert("kind".to_string(), serde_json::json!("PipelineNotFound"));
                map.insert("job_id".to_string(), serde_json::json!(job_id));
            }
            Self::Storage(msg) => {
                map.insert("kind".to_string(), serde_json::json!("Storage"));
                map.insert("error".to_string(), serde_json::json!(msg));
            }
            Self::Serialization(e) => {
                map.insert("kind".to_string(), serde_json::json!("Serialization"));
                map.insert("error".to_string(), serde_json::json!(e.to_string()));
            }
            Self::Internal(msg) => {
                map.insert("kind".to_string(), serde_json::json!("Internal"));
                map.insert("error".to_string(), serde_json::json!(msg));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}
