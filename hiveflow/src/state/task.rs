//! Task: the runtime unit of dispatch, and its lifecycle states.

use crate::utils::{generate_uuid, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a node or task.
///
/// `Pending -> Creating -> Active -> Succeed | Failed | Stopped`. Terminal
/// states are immutable except through an explicit stop, which forces any
/// non-terminal task to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionState {
    /// Not yet materialized.
    #[default]
    Pending,
    /// Task constructed, awaiting dispatch.
    Creating,
    /// Dispatched, awaiting a worker.
    Active,
    /// Terminal success.
    Succeed,
    /// Terminal failure.
    Failed,
    /// Terminal stop, forced by a stop command or pipeline failure.
    Stopped,
}

impl ExecutionState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Failed | Self::Stopped)
    }

    /// Returns true for terminal success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Creating => write!(f, "creating"),
            Self::Active => write!(f, "active"),
            Self::Succeed => write!(f, "succeed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One concrete executable unit: a node, or one element of a batch node.
///
/// Tasks are created when their node becomes eligible and live until the
/// whole pipeline run terminates; they are never reused across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// Owning node.
    pub node_name: String,
    /// Algorithm the worker runs.
    pub algorithm_name: String,
    /// Position within the batch; `None` for ordinary nodes.
    pub batch_index: Option<usize>,
    /// Fully resolved concrete input.
    pub input: serde_json::Value,
    /// Current lifecycle state.
    pub state: ExecutionState,
    /// Worker-reported result, present once `Succeed`.
    pub result: Option<serde_json::Value>,
    /// Worker-reported error, present once `Failed`.
    pub error: Option<String>,
    /// Last transition time.
    pub updated_at: Timestamp,
}

impl Task {
    /// Creates a task in `Creating` state.
    #[must_use]
    pub fn new(
        node_name: impl Into<String>,
        algorithm_name: impl Into<String>,
        batch_index: Option<usize>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: generate_uuid(),
            node_name: node_name.into(),
            algorithm_name: algorithm_name.into(),
            batch_index,
            input,
            state: ExecutionState::Creating,
            result: None,
            error: None,
            updated_at: now_utc(),
        }
    }

    /// Applies a monotonic transition.
    ///
    /// Returns false without mutating when the task is already terminal;
    /// duplicate deliveries from an at-least-once queue land here.
    pub fn transition(
        &mut self,
        state: ExecutionState,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        if result.is_some() {
            self.result = result;
        }
        if error.is_some() {
            self.error = error;
        }
        self.updated_at = now_utc();
        true
    }

    /// Forces a non-terminal task to `Stopped`.
    ///
    /// The only transition allowed to touch a task out of band; terminal
    /// tasks are left untouched.
    pub fn force_stop(&mut self) -> bool {
        self.transition(ExecutionState::Stopped, None, None)
    }
}
