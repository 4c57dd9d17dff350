//! In-memory collaborators and fixtures for engine tests.
//!
//! Everything here is deterministic and side-effect free, so integration
//! tests can drive whole pipeline runs without external services.

mod fixtures;
mod mocks;

pub use fixtures::{batch_pipeline, diamond_pipeline, linear_pipeline};
pub use mocks::{
    EchoWorker, InMemoryPipelineSource, InMemoryValueStorage, RecordingSnapshotSink,
    RecordingStatusSink, RecordingTaskSink,
};
