//! External collaborator interfaces.
//!
//! The engine never performs durable I/O itself; pipeline definitions,
//! task delivery, large-value storage and status/snapshot writes all go
//! through these seams. No wire format is prescribed; implementations must
//! preserve node names, reference sigils and dotted paths bit-for-bit.

use crate::engine::{FinalStatus, GraphSnapshot, TaskAssignment};
use crate::errors::HiveflowError;
use crate::spec::PipelineDescriptor;
use crate::storage::StorageInfo;
use async_trait::async_trait;

/// Read-only source of pipeline definitions; called once per run.
#[async_trait]
pub trait PipelineSource: Send + Sync {
    /// Fetches the stored definition for a job.
    ///
    /// # Errors
    ///
    /// `PipelineNotFound` when no definition exists for the job id.
    async fn fetch_pipeline(&self, job_id: &str) -> Result<PipelineDescriptor, HiveflowError>;
}

/// Fire-and-forget sink delivering task assignments to workers.
///
/// The engine does not track delivery, only logical dispatch.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Enqueues a set of ready tasks for a job.
    async fn enqueue_tasks(
        &self,
        job_id: &str,
        tasks: Vec<TaskAssignment>,
    ) -> Result<(), HiveflowError>;
}

/// Storage for values above the inlining threshold.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValueStorage: Send + Sync {
    /// Stores a value and returns a pointer to it.
    async fn put_value(&self, value: serde_json::Value) -> Result<StorageInfo, HiveflowError>;

    /// Retrieves a previously stored value.
    async fn get_value(&self, info: &StorageInfo) -> Result<serde_json::Value, HiveflowError>;
}

/// Sink for serializable graph/state projections, written on change.
///
/// For external inspection only; not required for correctness.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Writes the current projection for a job.
    async fn write_snapshot(
        &self,
        job_id: &str,
        snapshot: &GraphSnapshot,
    ) -> Result<(), HiveflowError>;
}

/// Sink receiving exactly one write at terminal pipeline state.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Writes the final status and aggregate results for a job.
    async fn write_status(&self, job_id: &str, status: &FinalStatus)
        -> Result<(), HiveflowError>;
}
