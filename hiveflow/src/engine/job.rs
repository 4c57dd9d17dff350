//! Per-job execution core: dispatch and result propagation.
//!
//! `JobExecution` is pure and synchronous; concurrency enters only at the
//! boundary. All mutations for one job go through a single writer (the job
//! runner's event loop), so processing is linearizable per pipeline run.

use crate::batch::{expand, Expansion};
use crate::errors::HiveflowError;
use crate::graph::{build_graph, DependencyGraph, EdgeKind};
use crate::reference::ResolutionContext;
use crate::spec::{PipelineDescriptor, StateType};
use crate::state::{ExecutionState, StateTracker, Task, UpdateOutcome};
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A task handed to the external job queue for a worker to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    /// Unique task identifier.
    pub task_id: Uuid,
    /// Owning node.
    pub node_name: String,
    /// Algorithm to invoke.
    pub algorithm_name: String,
    /// Batch position, `None` for ordinary nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_index: Option<usize>,
    /// Fully resolved concrete input.
    pub input: Value,
    /// Statefulness flag, passed through unchanged.
    pub state_type: StateType,
}

/// Terminal status reported by a worker for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionStatus {
    /// The task succeeded.
    Succeed,
    /// The task failed.
    Failed,
    /// The worker observed a stop command.
    Stopped,
}

impl From<CompletionStatus> for ExecutionState {
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Succeed => Self::Succeed,
            CompletionStatus::Failed => Self::Failed,
            CompletionStatus::Stopped => Self::Stopped,
        }
    }
}

/// An inbound task-completion event.
///
/// Delivered at least once and unordered across nodes; the engine tolerates
/// arbitrary interleaving and duplicate terminal deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    /// The owning job.
    pub job_id: String,
    /// The owning node.
    pub node_name: String,
    /// Batch position, `None` for ordinary nodes.
    pub task_index: Option<usize>,
    /// Reported terminal status.
    pub status: CompletionStatus,
    /// Result payload on success.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal outcome of a whole pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PipelineOutcome {
    /// Every node succeeded.
    Completed {
        /// Aggregate results of the `includeInResult` nodes.
        results: Value,
    },
    /// A critical node exhausted its failure tolerance.
    Failed {
        /// The failing node.
        node: String,
        /// The failing task's batch index, if any.
        task_index: Option<usize>,
        /// The recorded error.
        error: String,
    },
    /// The run was stopped by command.
    Stopped,
}

/// The one write made to the status sink at terminal pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStatus {
    /// The terminal outcome with its payload.
    #[serde(flatten)]
    pub outcome: PipelineOutcome,
    /// RFC 3339 time of termination.
    pub timestamp: String,
}

impl FinalStatus {
    /// Stamps an outcome with the current time.
    #[must_use]
    pub fn new(outcome: PipelineOutcome) -> Self {
        Self {
            outcome,
            timestamp: iso_timestamp(),
        }
    }
}

/// What one state change made runnable, and whether the run terminated.
#[derive(Debug, Default)]
pub struct Progress {
    /// Tasks that became ready to dispatch, in deterministic order.
    pub ready_tasks: Vec<TaskAssignment>,
    /// The terminal outcome, reported exactly once per run.
    pub outcome: Option<PipelineOutcome>,
}

/// The execution state machine for one pipeline run.
///
/// Owns the dependency graph and the state tracker; the runner owns this
/// struct exclusively and feeds it events one at a time.
#[derive(Debug)]
pub struct JobExecution {
    job_id: String,
    descriptor: PipelineDescriptor,
    graph: DependencyGraph,
    tracker: StateTracker,
    finished: bool,
}

impl JobExecution {
    /// Validates the definition, builds the graph and registers all nodes.
    ///
    /// # Errors
    ///
    /// Any build-time error (duplicate names, invalid input shape, cycle)
    /// aborts construction entirely; nothing partially starts.
    pub fn new(job_id: impl Into<String>, descriptor: PipelineDescriptor) -> Result<Self, HiveflowError> {
        let graph = build_graph(&descriptor)?;
        let tracker = StateTracker::new(&descriptor);
        Ok(Self {
            job_id: job_id.into(),
            descriptor,
            graph,
            tracker,
            finished: false,
        })
    }

    /// The job identifier.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The validated dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The state tracker.
    #[must_use]
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// The pipeline definition.
    #[must_use]
    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// True once a terminal outcome has been reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Materializes entry-node tasks and reports the initial ready set.
    ///
    /// A pipeline whose entry nodes all expand to empty batches can
    /// terminate here without dispatching anything.
    pub fn start(&mut self) -> Progress {
        info!(job_id = %self.job_id, nodes = self.graph.node_count(), "starting pipeline run");
        self.evaluate()
    }

    /// Processes one task-completion event.
    ///
    /// Records the result, re-evaluates child eligibility, expands batches
    /// lazily and reports newly ready tasks. Duplicate deliveries for
    /// already-terminal tasks are no-ops.
    pub fn on_task_completed(&mut self, completion: &TaskCompletion) -> Progress {
        if self.finished {
            debug!(
                job_id = %self.job_id,
                node = %completion.node_name,
                "ignoring completion for finished pipeline"
            );
            return Progress::default();
        }

        let state = ExecutionState::from(completion.status);
        let outcome = self.tracker.update_task(
            &completion.node_name,
            completion.task_index,
            state,
            completion.result.clone(),
            completion.error.clone(),
        );

        match outcome {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Duplicate => {
                debug!(
                    job_id = %self.job_id,
                    node = %completion.node_name,
                    task_index = ?completion.task_index,
                    "duplicate delivery for terminal task"
                );
                return Progress::default();
            }
            UpdateOutcome::UnknownTask => {
                warn!(
                    job_id = %self.job_id,
                    node = %completion.node_name,
                    task_index = ?completion.task_index,
                    "completion for unknown task"
                );
                return Progress::default();
            }
        }

        debug!(
            job_id = %self.job_id,
            node = %completion.node_name,
            task_index = ?completion.task_index,
            state = %state,
            "task completed"
        );

        // A node that just reached success satisfies the wait-any edges of
        // its children; record the winner monotonically.
        if self.tracker.node_state(&completion.node_name) == ExecutionState::Succeed {
            for child in self.graph.children(&completion.node_name) {
                if self.graph.edge_kind(&completion.node_name, child)
                    == Some(EdgeKind::WaitAny)
                {
                    let child = child.to_string();
                    self.tracker.mark_satisfied_any(&child, &completion.node_name);
                }
            }
        }

        self.evaluate()
    }

    /// Stops the run: every non-terminal task transitions to `Stopped` and
    /// the pipeline reports `Stopped` rather than failed or completed.
    pub fn stop(&mut self) -> Progress {
        if self.finished {
            return Progress::default();
        }
        let stopped = self.tracker.stop_all();
        self.finished = true;
        info!(job_id = %self.job_id, stopped_tasks = stopped, "pipeline stopped by command");
        Progress {
            ready_tasks: Vec::new(),
            outcome: Some(PipelineOutcome::Stopped),
        }
    }

    /// Drives materialization to a fixpoint, then decides the outcome.
    fn evaluate(&mut self) -> Progress {
        let mut ready = Vec::new();
        if self.finished {
            return Progress::default();
        }

        let names: Vec<String> = self.graph.node_names().to_vec();
        loop {
            let mut changed = false;
            for name in &names {
                match self.tracker.node_state(name) {
                    ExecutionState::Pending => {}
                    _ => continue,
                }
                if self.is_eligible(name) {
                    ready.extend(self.materialize_node(name));
                    changed = true;
                } else if self.is_unsatisfiable(name) {
                    debug!(job_id = %self.job_id, node = %name, "skipping unsatisfiable node");
                    self.tracker.mark_skipped(name);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        if let Some((node, task_index, error)) = self.first_critical_failure_owned() {
            // Best-effort: already-dispatched siblings are told to stop
            // rather than left dangling.
            self.tracker.stop_all();
            self.finished = true;
            info!(job_id = %self.job_id, node = %node, "pipeline failed");
            return Progress {
                ready_tasks: Vec::new(),
                outcome: Some(PipelineOutcome::Failed {
                    node,
                    task_index,
                    error,
                }),
            };
        }

        let outcome = if self.tracker.all_terminal() {
            self.finished = true;
            if self.all_critical_succeeded() {
                info!(job_id = %self.job_id, "pipeline completed");
                Some(PipelineOutcome::Completed {
                    results: self.tracker.pipeline_results(),
                })
            } else {
                // A critical node terminated without success (stopped when
                // its predecessors could never satisfy it).
                let node = self.first_critical_unsatisfied().unwrap_or_default();
                info!(job_id = %self.job_id, node = %node, "pipeline failed, node never satisfied");
                Some(PipelineOutcome::Failed {
                    error: format!("node '{node}' could not run: predecessor failed"),
                    node,
                    task_index: None,
                })
            }
        } else {
            None
        };

        Progress {
            ready_tasks: ready,
            outcome,
        }
    }

    /// A pending node is eligible when every wait-all/wait-batch parent has
    /// succeeded and, if it has wait-any parents, at least one of them has.
    fn is_eligible(&mut self, node: &str) -> bool {
        let mut any_parents = Vec::new();
        for (parent, kind) in self.graph.parents(node) {
            match kind {
                EdgeKind::WaitAny => any_parents.push(parent.to_string()),
                EdgeKind::WaitAll | EdgeKind::WaitBatch => {
                    if self.tracker.node_state(parent) != ExecutionState::Succeed {
                        return false;
                    }
                }
            }
        }
        if any_parents.is_empty() {
            return true;
        }
        if self.tracker.is_any_satisfied(node) {
            return true;
        }
        for parent in any_parents {
            if self.tracker.node_state(&parent) == ExecutionState::Succeed {
                self.tracker.mark_satisfied_any(node, &parent);
                return true;
            }
        }
        false
    }

    /// A pending node can never run once a wait-all/wait-batch parent
    /// terminated without success, or all its wait-any candidates did.
    fn is_unsatisfiable(&self, node: &str) -> bool {
        let mut any_parents = Vec::new();
        for (parent, kind) in self.graph.parents(node) {
            let state = self.tracker.node_state(parent);
            match kind {
                EdgeKind::WaitAny => any_parents.push(state),
                EdgeKind::WaitAll | EdgeKind::WaitBatch => {
                    if state.is_terminal() && state != ExecutionState::Succeed {
                        return true;
                    }
                }
            }
        }
        if any_parents.is_empty() || self.tracker.is_any_satisfied(node) {
            return false;
        }
        any_parents
            .iter()
            .all(|s| s.is_terminal() && *s != ExecutionState::Succeed)
    }

    /// Expands and materializes an eligible node, returning its dispatch
    /// assignments. Resolution failures materialize as an already-failed
    /// task, so the failure policy applies uniformly.
    fn materialize_node(&mut self, name: &str) -> Vec<TaskAssignment> {
        let Some(node) = self.descriptor.node(name).cloned() else {
            return Vec::new();
        };

        let results = self.tracker.completed_results();
        let ctx = ResolutionContext::new(&self.descriptor.flow_input, &results);

        let expansion = match expand(&node, ctx) {
            Ok(expansion) => expansion,
            Err(err) => {
                warn!(job_id = %self.job_id, node = %name, error = %err, "input resolution failed");
                let mut task = Task::new(name, &node.algorithm_name, None, Value::Null);
                task.transition(ExecutionState::Failed, None, Some(err.to_string()));
                self.tracker.materialize(name, vec![task], false);
                return Vec::new();
            }
        };

        let is_batch = expansion.is_batch();
        let tasks: Vec<Task> = match &expansion {
            Expansion::Single(input) => {
                vec![Task::new(name, &node.algorithm_name, None, input.clone())]
            }
            Expansion::Batch(inputs) => inputs
                .iter()
                .enumerate()
                .map(|(i, input)| Task::new(name, &node.algorithm_name, Some(i), input.clone()))
                .collect(),
        };

        debug!(
            job_id = %self.job_id,
            node = %name,
            tasks = tasks.len(),
            batch = is_batch,
            "materialized node"
        );

        let assignments: Vec<TaskAssignment> = tasks
            .iter()
            .map(|task| TaskAssignment {
                task_id: task.id,
                node_name: task.node_name.clone(),
                algorithm_name: task.algorithm_name.clone(),
                batch_index: task.batch_index,
                input: task.input.clone(),
                state_type: node.state_type,
            })
            .collect();

        self.tracker.materialize(name, tasks, is_batch);

        // Logical dispatch: assignments leave through a fire-and-forget
        // sink, so the tasks move to active here.
        for assignment in &assignments {
            self.tracker.update_task(
                &assignment.node_name,
                assignment.batch_index,
                ExecutionState::Active,
                None,
                None,
            );
        }

        assignments
    }

    fn all_critical_succeeded(&self) -> bool {
        self.tracker.node_names().iter().all(|name| {
            self.tracker.node(name).map_or(true, |node| {
                !node.critical || node.state() == ExecutionState::Succeed
            })
        })
    }

    fn first_critical_unsatisfied(&self) -> Option<String> {
        self.tracker
            .node_names()
            .iter()
            .find(|name| {
                self.tracker.node(name).is_some_and(|node| {
                    node.critical && node.state() != ExecutionState::Succeed
                })
            })
            .cloned()
    }

    fn first_critical_failure_owned(&self) -> Option<(String, Option<usize>, String)> {
        self.tracker
            .first_critical_failure()
            .map(|(node, index, error)| (node.to_string(), index, error))
    }
}
