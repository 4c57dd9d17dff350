//! In-memory implementations of the engine's collaborator interfaces.

use crate::engine::{FinalStatus, GraphSnapshot, TaskAssignment};
use crate::errors::HiveflowError;
use crate::interfaces::{PipelineSource, SnapshotSink, StatusSink, TaskSink, ValueStorage};
use crate::spec::PipelineDescriptor;
use crate::storage::StorageInfo;
use crate::utils::generate_uuid;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Pipeline source backed by a map from job id to definition.
#[derive(Debug, Default)]
pub struct InMemoryPipelineSource {
    pipelines: Mutex<HashMap<String, PipelineDescriptor>>,
}

impl InMemoryPipelineSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under a job id.
    pub fn insert(&self, job_id: impl Into<String>, descriptor: PipelineDescriptor) {
        self.pipelines.lock().insert(job_id.into(), descriptor);
    }
}

#[async_trait]
impl PipelineSource for InMemoryPipelineSource {
    async fn fetch_pipeline(&self, job_id: &str) -> Result<PipelineDescriptor, HiveflowError> {
        self.pipelines
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| HiveflowError::PipelineNotFound {
                job_id: job_id.to_string(),
            })
    }
}

/// Task sink that records every dispatched assignment.
#[derive(Debug, Default)]
pub struct RecordingTaskSink {
    dispatched: Mutex<Vec<(String, TaskAssignment)>>,
}

impl RecordingTaskSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded assignment, in dispatch order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<(String, TaskAssignment)> {
        self.dispatched.lock().clone()
    }

    /// Node names of the recorded assignments, in dispatch order.
    #[must_use]
    pub fn dispatched_nodes(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .iter()
            .map(|(_, a)| a.node_name.clone())
            .collect()
    }
}

#[async_trait]
impl TaskSink for RecordingTaskSink {
    async fn enqueue_tasks(
        &self,
        job_id: &str,
        tasks: Vec<TaskAssignment>,
    ) -> Result<(), HiveflowError> {
        let mut dispatched = self.dispatched.lock();
        for task in tasks {
            dispatched.push((job_id.to_string(), task));
        }
        Ok(())
    }
}

/// Task sink that forwards assignments over a channel so a test can play
/// the worker side of the queue.
#[derive(Debug)]
pub struct EchoWorker {
    tx: mpsc::UnboundedSender<(String, TaskAssignment)>,
}

impl EchoWorker {
    /// Creates the sink and the receiving end a test drives.
    #[must_use]
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(String, TaskAssignment)>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl TaskSink for EchoWorker {
    async fn enqueue_tasks(
        &self,
        job_id: &str,
        tasks: Vec<TaskAssignment>,
    ) -> Result<(), HiveflowError> {
        for task in tasks {
            self.tx
                .send((job_id.to_string(), task))
                .map_err(|_| HiveflowError::Internal("worker channel closed".to_string()))?;
        }
        Ok(())
    }
}

/// Value storage backed by a map keyed by generated paths.
#[derive(Debug, Default)]
pub struct InMemoryValueStorage {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryValueStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// True when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait]
impl ValueStorage for InMemoryValueStorage {
    async fn put_value(&self, value: serde_json::Value) -> Result<StorageInfo, HiveflowError> {
        let size = serde_json::to_vec(&value)?.len();
        let path = format!("mem://{}", generate_uuid());
        self.values.lock().insert(path.clone(), value);
        Ok(StorageInfo::new(path, size))
    }

    async fn get_value(&self, info: &StorageInfo) -> Result<serde_json::Value, HiveflowError> {
        self.values
            .lock()
            .get(&info.path)
            .cloned()
            .ok_or_else(|| HiveflowError::Storage(format!("no value at '{}'", info.path)))
    }
}

/// Snapshot sink keeping every written projection.
#[derive(Debug, Default)]
pub struct RecordingSnapshotSink {
    snapshots: Mutex<Vec<GraphSnapshot>>,
}

impl RecordingSnapshotSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently written snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<GraphSnapshot> {
        self.snapshots.lock().last().cloned()
    }

    /// Number of snapshots written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.snapshots.lock().len()
    }
}

#[async_trait]
impl SnapshotSink for RecordingSnapshotSink {
    async fn write_snapshot(
        &self,
        _job_id: &str,
        snapshot: &GraphSnapshot,
    ) -> Result<(), HiveflowError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}

/// Status sink a test can await; remembers every write so the
/// exactly-once contract is checkable.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    statuses: Mutex<Vec<(String, FinalStatus)>>,
    notify: Notify,
}

impl RecordingStatusSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All status writes, in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, FinalStatus)> {
        self.statuses.lock().clone()
    }

    /// Waits until at least one status has been written and returns the
    /// first one.
    pub async fn wait_written(&self) -> (String, FinalStatus) {
        loop {
            if let Some(first) = self.statuses.lock().first().cloned() {
                return first;
            }
            self.notify.notified().await;
        }
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn write_status(
        &self,
        job_id: &str,
        status: &FinalStatus,
    ) -> Result<(), HiveflowError> {
        self.statuses
            .lock()
            .push((job_id.to_string(), status.clone()));
        self.notify.notify_one();
        Ok(())
    }
}
