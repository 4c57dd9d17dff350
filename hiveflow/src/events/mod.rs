//! Engine lifecycle events.
//!
//! Events are observational only: no engine decision depends on whether an
//! event was delivered. The runner emits one event per lifecycle change so
//! external consumers (dashboards, audit trails) can follow a run.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Well-known event type names emitted by the engine.
pub mod names {
    /// A pipeline run started and its entry tasks were dispatched.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A pipeline run reached terminal state with all nodes succeeded.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A pipeline run failed on a critical node.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A pipeline run was stopped by command.
    pub const PIPELINE_STOPPED: &str = "pipeline.stopped";
    /// A batch of task assignments was handed to the task sink.
    pub const TASKS_DISPATCHED: &str = "tasks.dispatched";
    /// A worker-reported task completion was applied.
    pub const TASK_COMPLETED: &str = "task.completed";
}
