//! In-memory execution state for one pipeline run.
//!
//! One tracker instance exists per running job, owned by that job's
//! single-writer event loop. Batch node aggregate state is derived from the
//! task states, never stored directly.

use super::task::{ExecutionState, Task};
use crate::spec::PipelineDescriptor;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Result of applying a task update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update transitioned the task.
    Applied,
    /// The task was already terminal; the delivery is a no-op.
    Duplicate,
    /// No such node or task index.
    UnknownTask,
}

/// Execution record for one node: its tasks plus failure policy.
#[derive(Debug, Clone)]
pub struct NodeExecution {
    /// The node name.
    pub node_name: String,
    /// Allowed percentage of failed batch items.
    pub tolerance_percent: u8,
    /// Whether failure of this node fails the pipeline.
    pub critical: bool,
    /// Whether the node was expanded from a batch reference.
    pub is_batch: bool,
    materialized: bool,
    skipped: bool,
    tasks: Vec<Task>,
}

impl NodeExecution {
    fn new(node_name: String, tolerance_percent: u8, critical: bool) -> Self {
        Self {
            node_name,
            tolerance_percent,
            critical,
            is_batch: false,
            materialized: false,
            skipped: false,
            tasks: Vec::new(),
        }
    }

    /// The node's tasks, in batch order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// True once tasks have been created for this node.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.materialized
    }

    /// True when failed tasks exceed the configured tolerance.
    ///
    /// Strict-greater rule: with 10 tasks at 20% tolerance the node
    /// survives 2 failures and fails on the 3rd.
    #[must_use]
    pub fn tolerance_exceeded(&self) -> bool {
        let failed = self
            .tasks
            .iter()
            .filter(|t| t.state == ExecutionState::Failed)
            .count();
        failed * 100 > usize::from(self.tolerance_percent) * self.tasks.len()
    }

    /// Derived aggregate state.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        if self.skipped {
            return ExecutionState::Stopped;
        }
        if !self.materialized {
            return ExecutionState::Pending;
        }
        if self.tasks.is_empty() {
            // A batch over an empty collection succeeds trivially.
            return ExecutionState::Succeed;
        }
        if self.tolerance_exceeded() {
            return ExecutionState::Failed;
        }
        if self.tasks.iter().all(|t| t.state.is_terminal()) {
            if self.tasks.iter().any(|t| t.state == ExecutionState::Stopped) {
                return ExecutionState::Stopped;
            }
            // Failures within tolerance do not demote the node.
            return ExecutionState::Succeed;
        }
        if self.tasks.iter().any(|t| t.state == ExecutionState::Active) {
            return ExecutionState::Active;
        }
        ExecutionState::Creating
    }

    /// Aggregate result: the bare result for a plain node, the ordered
    /// array of per-task results for a batch node. Tasks failed within
    /// tolerance contribute `null`.
    #[must_use]
    pub fn aggregate_result(&self) -> Value {
        let per_task = |t: &Task| t.result.clone().unwrap_or(Value::Null);
        if self.is_batch {
            Value::Array(self.tasks.iter().map(per_task).collect())
        } else {
            self.tasks.first().map(per_task).unwrap_or(Value::Null)
        }
    }

    /// First recorded task error, for failure reporting.
    #[must_use]
    pub fn first_error(&self) -> Option<(Option<usize>, String)> {
        self.tasks
            .iter()
            .find(|t| t.error.is_some())
            .and_then(|t| t.error.clone().map(|e| (t.batch_index, e)))
    }
}

/// Per-job map from node name (and batch index) to execution state.
#[derive(Debug)]
pub struct StateTracker {
    order: Vec<String>,
    nodes: HashMap<String, NodeExecution>,
    /// consumer -> wait-any parents that have succeeded. Monotonic: entries
    /// are only ever added, so duplicate deliveries replay idempotently.
    satisfied_any: HashMap<String, BTreeSet<String>>,
}

impl StateTracker {
    /// Registers every node of a pipeline with its failure policy.
    #[must_use]
    pub fn new(descriptor: &PipelineDescriptor) -> Self {
        let mut nodes = HashMap::new();
        let mut order = Vec::new();
        for node in &descriptor.nodes {
            order.push(node.node_name.clone());
            nodes.insert(
                node.node_name.clone(),
                NodeExecution::new(
                    node.node_name.clone(),
                    descriptor.tolerance_for(node),
                    node.include_in_result,
                ),
            );
        }
        Self {
            order,
            nodes,
            satisfied_any: HashMap::new(),
        }
    }

    /// Looks up a node's execution record.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeExecution> {
        self.nodes.get(name)
    }

    /// Derived aggregate state for a node; `Pending` for unknown names.
    #[must_use]
    pub fn node_state(&self, name: &str) -> ExecutionState {
        self.nodes
            .get(name)
            .map_or(ExecutionState::Pending, NodeExecution::state)
    }

    /// Installs the expanded tasks for a node.
    pub fn materialize(&mut self, name: &str, tasks: Vec<Task>, is_batch: bool) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.tasks = tasks;
            node.is_batch = is_batch;
            node.materialized = true;
        }
    }

    /// Marks an unmaterialized node as skipped: its predecessors can never
    /// satisfy it, so it terminates as `Stopped` without running.
    pub fn mark_skipped(&mut self, name: &str) {
        if let Some(node) = self.nodes.get_mut(name) {
            if !node.materialized {
                node.skipped = true;
            }
        }
    }

    /// Applies a monotonic task update.
    ///
    /// Ordinary nodes address their single task with `batch_index == None`;
    /// batch nodes address per-index.
    pub fn update_task(
        &mut self,
        node_name: &str,
        batch_index: Option<usize>,
        state: ExecutionState,
        result: Option<Value>,
        error: Option<String>,
    ) -> UpdateOutcome {
        let Some(node) = self.nodes.get_mut(node_name) else {
            return UpdateOutcome::UnknownTask;
        };
        let index = batch_index.unwrap_or(0);
        let Some(task) = node.tasks.get_mut(index) else {
            return UpdateOutcome::UnknownTask;
        };
        if task.transition(state, result, error) {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Duplicate
        }
    }

    /// Forces every non-terminal task to `Stopped` and skips every
    /// unmaterialized node. Returns the number of tasks transitioned.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for node in self.nodes.values_mut() {
            if node.materialized {
                for task in &mut node.tasks {
                    if task.force_stop() {
                        stopped += 1;
                    }
                }
            } else {
                node.skipped = true;
            }
        }
        stopped
    }

    /// Records that `winner` satisfied one of `consumer`'s wait-any edges.
    pub fn mark_satisfied_any(&mut self, consumer: &str, winner: &str) {
        self.satisfied_any
            .entry(consumer.to_string())
            .or_default()
            .insert(winner.to_string());
    }

    /// True once any wait-any parent of `consumer` has succeeded.
    #[must_use]
    pub fn is_any_satisfied(&self, consumer: &str) -> bool {
        self.satisfied_any
            .get(consumer)
            .map_or(false, |set| !set.is_empty())
    }

    /// Aggregate results of every succeeded node, for reference resolution.
    #[must_use]
    pub fn completed_results(&self) -> HashMap<String, Value> {
        self.nodes
            .values()
            .filter(|n| n.state() == ExecutionState::Succeed)
            .map(|n| (n.node_name.clone(), n.aggregate_result()))
            .collect()
    }

    /// True when every node's aggregate state is `Succeed`.
    #[must_use]
    pub fn is_all_succeeded(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.state() == ExecutionState::Succeed)
    }

    /// True when every node's aggregate state is terminal.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.state().is_terminal())
    }

    /// The first critical node whose aggregate state is `Failed`,
    /// definition order, with its recorded error.
    #[must_use]
    pub fn first_critical_failure(&self) -> Option<(&str, Option<usize>, String)> {
        self.order
            .iter()
            .filter_map(|name| self.nodes.get(name))
            .find(|n| n.critical && n.state() == ExecutionState::Failed)
            .map(|n| {
                let (index, error) = n
                    .first_error()
                    .unwrap_or((None, "task failed".to_string()));
                (n.node_name.as_str(), index, error)
            })
    }

    /// Aggregate results of every critical (`includeInResult`) node, keyed
    /// by node name, for the final status write.
    #[must_use]
    pub fn pipeline_results(&self) -> Value {
        let mut map = serde_json::Map::new();
        for name in &self.order {
            if let Some(node) = self.nodes.get(name) {
                if node.critical && node.state() == ExecutionState::Succeed {
                    map.insert(name.clone(), node.aggregate_result());
                }
            }
        }
        Value::Object(map)
    }

    /// Node names in definition order.
    #[must_use]
    pub fn node_names(&self) -> &[String] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PipelineNode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tracker_with(nodes: Vec<PipelineNode>) -> StateTracker {
        StateTracker::new(&PipelineDescriptor::new("test", nodes))
    }

    fn batch_tasks(node: &str, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| Task::new(node, "alg", Some(i), json!([i])))
            .collect()
    }

    #[test]
    fn test_unmaterialized_node_is_pending() {
        let tracker = tracker_with(vec![PipelineNode::new("a", "alg")]);
        assert_eq!(tracker.node_state("a"), ExecutionState::Pending);
        assert!(!tracker.all_terminal());
    }

    #[test]
    fn test_plain_node_lifecycle() {
        let mut tracker = tracker_with(vec![PipelineNode::new("a", "alg")]);
        tracker.materialize("a", vec![Task::new("a", "alg", None, json!([1]))], false);
        assert_eq!(tracker.node_state("a"), ExecutionState::Creating);

        tracker.update_task("a", None, ExecutionState::Active, None, None);
        assert_eq!(tracker.node_state("a"), ExecutionState::Active);

        tracker.update_task("a", None, ExecutionState::Succeed, Some(json!(7)), None);
        assert_eq!(tracker.node_state("a"), ExecutionState::Succeed);
        assert_eq!(tracker.completed_results().get("a"), Some(&json!(7)));
        assert!(tracker.is_all_succeeded());
    }

    #[test]
    fn test_duplicate_terminal_update_is_noop() {
        let mut tracker = tracker_with(vec![PipelineNode::new("a", "alg")]);
        tracker.materialize("a", vec![Task::new("a", "alg", None, json!([]))], false);

        let first = tracker.update_task("a", None, ExecutionState::Succeed, Some(json!(1)), None);
        assert_eq!(first, UpdateOutcome::Applied);

        let second = tracker.update_task("a", None, ExecutionState::Succeed, Some(json!(2)), None);
        assert_eq!(second, UpdateOutcome::Duplicate);
        assert_eq!(tracker.completed_results().get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_batch_aggregate_succeeds_only_when_all_succeed() {
        let mut tracker = tracker_with(vec![PipelineNode::new("b", "alg")]);
        tracker.materialize("b", batch_tasks("b", 3), true);

        for i in 0..2 {
            tracker.update_task("b", Some(i), ExecutionState::Succeed, Some(json!(i)), None);
            assert_ne!(tracker.node_state("b"), ExecutionState::Succeed);
        }
        tracker.update_task("b", Some(2), ExecutionState::Succeed, Some(json!(2)), None);
        assert_eq!(tracker.node_state("b"), ExecutionState::Succeed);
        assert_eq!(
            tracker.completed_results().get("b"),
            Some(&json!([0, 1, 2]))
        );
    }

    #[test]
    fn test_zero_tolerance_fails_on_first_failure() {
        let mut tracker = tracker_with(vec![PipelineNode::new("b", "alg")]);
        tracker.materialize("b", batch_tasks("b", 2), true);

        tracker.update_task(
            "b",
            Some(0),
            ExecutionState::Failed,
            None,
            Some("boom".to_string()),
        );
        assert_eq!(tracker.node_state("b"), ExecutionState::Failed);
        assert!(tracker.first_critical_failure().is_some());
    }

    #[test]
    fn test_tolerance_strict_greater_rule() {
        let mut tracker =
            tracker_with(vec![PipelineNode::new("b", "alg").with_batch_tolerance(20)]);
        tracker.materialize("b", batch_tasks("b", 10), true);

        // 2 failures out of 10 at 20% tolerance: still survivable.
        tracker.update_task("b", Some(0), ExecutionState::Failed, None, Some("e".into()));
        tracker.update_task("b", Some(1), ExecutionState::Failed, None, Some("e".into()));
        assert_ne!(tracker.node_state("b"), ExecutionState::Failed);

        // 8 successes: the node succeeds despite the in-tolerance failures.
        for i in 2..10 {
            tracker.update_task("b", Some(i), ExecutionState::Succeed, Some(json!(i)), None);
        }
        assert_eq!(tracker.node_state("b"), ExecutionState::Succeed);
        let results = tracker.completed_results();
        let aggregate = results.get("b").unwrap().as_array().unwrap();
        assert_eq!(aggregate[0], json!(null));
        assert_eq!(aggregate[9], json!(9));
    }

    #[test]
    fn test_tolerance_third_failure_fails_node() {
        let mut tracker =
            tracker_with(vec![PipelineNode::new("b", "alg").with_batch_tolerance(20)]);
        tracker.materialize("b", batch_tasks("b", 10), true);

        for i in 0..3 {
            tracker.update_task("b", Some(i), ExecutionState::Failed, None, Some("e".into()));
        }
        assert_eq!(tracker.node_state("b"), ExecutionState::Failed);
    }

    #[test]
    fn test_empty_batch_succeeds_trivially() {
        let mut tracker = tracker_with(vec![PipelineNode::new("b", "alg")]);
        tracker.materialize("b", Vec::new(), true);

        assert_eq!(tracker.node_state("b"), ExecutionState::Succeed);
        assert_eq!(tracker.completed_results().get("b"), Some(&json!([])));
    }

    #[test]
    fn test_stop_all_spares_terminal_tasks() {
        let mut tracker = tracker_with(vec![
            PipelineNode::new("a", "alg"),
            PipelineNode::new("b", "alg"),
        ]);
        tracker.materialize("a", vec![Task::new("a", "alg", None, json!([]))], false);
        tracker.update_task("a", None, ExecutionState::Succeed, Some(json!(1)), None);

        let stopped = tracker.stop_all();
        assert_eq!(stopped, 0);
        assert_eq!(tracker.node_state("a"), ExecutionState::Succeed);
        // The unmaterialized node terminates as stopped.
        assert_eq!(tracker.node_state("b"), ExecutionState::Stopped);
        assert!(tracker.all_terminal());
    }

    #[test]
    fn test_stop_all_counts_only_transitioned_tasks() {
        let mut tracker = tracker_with(vec![PipelineNode::new("b", "alg")]);
        tracker.materialize("b", batch_tasks("b", 4), true);

        tracker.update_task("b", Some(0), ExecutionState::Succeed, Some(json!(0)), None);
        tracker.update_task("b", Some(1), ExecutionState::Failed, None, Some("e".into()));
        tracker.update_task("b", Some(2), ExecutionState::Active, None, None);

        // The succeeded and failed tasks stay put; the active and creating
        // ones transition.
        let stopped = tracker.stop_all();
        assert_eq!(stopped, 2);
        assert_eq!(tracker.node_state("b"), ExecutionState::Failed);
        assert!(tracker.all_terminal());
    }

    #[test]
    fn test_wait_any_satisfaction_is_monotonic() {
        let mut tracker = tracker_with(vec![PipelineNode::new("c", "alg")]);
        assert!(!tracker.is_any_satisfied("c"));

        tracker.mark_satisfied_any("c", "a");
        tracker.mark_satisfied_any("c", "a");
        assert!(tracker.is_any_satisfied("c"));
    }

    #[test]
    fn test_non_critical_failure_not_reported() {
        let mut tracker = tracker_with(vec![PipelineNode::new("leaf", "alg").non_critical()]);
        tracker.materialize("leaf", vec![Task::new("leaf", "alg", None, json!([]))], false);
        tracker.update_task(
            "leaf",
            None,
            ExecutionState::Failed,
            None,
            Some("boom".to_string()),
        );

        assert_eq!(tracker.node_state("leaf"), ExecutionState::Failed);
        assert!(tracker.first_critical_failure().is_none());
    }

    #[test]
    fn test_pipeline_results_skip_non_critical() {
        let mut tracker = tracker_with(vec![
            PipelineNode::new("a", "alg"),
            PipelineNode::new("metrics", "alg").non_critical(),
        ]);
        tracker.materialize("a", vec![Task::new("a", "alg", None, json!([]))], false);
        tracker.update_task("a", None, ExecutionState::Succeed, Some(json!("out")), None);
        tracker.materialize(
            "metrics",
            vec![Task::new("metrics", "alg", None, json!([]))],
            false,
        );
        tracker.update_task("metrics", None, ExecutionState::Succeed, Some(json!(9)), None);

        assert_eq!(tracker.pipeline_results(), json!({"a": "out"}));
    }
}
