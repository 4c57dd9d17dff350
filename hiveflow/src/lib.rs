//! # Hiveflow
//!
//! A pipeline DAG execution engine for distributed algorithm workers.
//!
//! A pipeline is a named set of nodes whose inputs may reference the
//! pipeline's flow input, other nodes' results, batch collections and
//! wait-any races through a compact sigil grammar (`@`, `#`, `#@`, `*@`,
//! `*#`). Hiveflow turns such a definition into a validated dependency
//! graph, expands batch nodes into per-element tasks, dispatches ready
//! tasks to external workers and propagates their results downstream until
//! the run completes, fails or is stopped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hiveflow::prelude::*;
//!
//! let registry = JobRegistry::new(services);
//! registry.start_job("job-1").await?;
//!
//! // Worker completions arrive from the queue consumer:
//! registry.complete_task(completion).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod batch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod interfaces;
pub mod reference;
pub mod spec;
pub mod state;
pub mod storage;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{expand, Expansion};
    pub use crate::engine::{
        CompletionStatus, FinalStatus, GraphSnapshot, JobExecution, JobRegistry, PipelineOutcome,
        Services, TaskAssignment, TaskCompletion,
    };
    pub use crate::errors::HiveflowError;
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{build_graph, DependencyGraph, EdgeKind};
    pub use crate::interfaces::{
        PipelineSource, SnapshotSink, StatusSink, TaskSink, ValueStorage,
    };
    pub use crate::reference::{classify, InputRef, ResolutionContext, ResolveMode};
    pub use crate::spec::{PipelineDescriptor, PipelineNode, PipelineOptions, StateType};
    pub use crate::state::{ExecutionState, StateTracker, Task};
    pub use crate::storage::{StorageInfo, STORAGE_MARKER};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
