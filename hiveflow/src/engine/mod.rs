//! The dispatch and propagation engine.
//!
//! [`JobExecution`] is the synchronous per-run state machine; [`JobRegistry`]
//! wraps it in a single-writer event loop per job and connects it to the
//! external collaborators in [`crate::interfaces`].

mod job;
mod runner;
mod snapshot;

pub use job::{
    CompletionStatus, FinalStatus, JobExecution, PipelineOutcome, Progress, TaskAssignment,
    TaskCompletion,
};
pub use runner::{JobRegistry, Services};
pub use snapshot::{EdgeSnapshot, GraphSnapshot, NodeSnapshot, TaskSnapshot};

#[cfg(test)]
mod integration_tests;
