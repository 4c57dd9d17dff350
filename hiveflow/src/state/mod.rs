//! Node and task execution state.

mod task;
mod tracker;

pub use task::{ExecutionState, Task};
pub use tracker::{NodeExecution, StateTracker, UpdateOutcome};
