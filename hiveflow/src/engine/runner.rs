//! Job runner: the async boundary around the per-job state machine.
//!
//! Each running job owns one spawned task with exclusive access to its
//! `JobExecution`; inbound events are serialized through an mpsc mailbox,
//! so every mutation for a job happens on a single writer.

use super::job::{FinalStatus, JobExecution, PipelineOutcome, Progress, TaskCompletion};
use super::snapshot::GraphSnapshot;
use crate::errors::HiveflowError;
use crate::events::{names, EventSink};
use crate::interfaces::{PipelineSource, SnapshotSink, StatusSink, TaskSink, ValueStorage};
use crate::storage::{as_pointer, maybe_externalize};
use crate::utils::generate_uuid;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mailbox capacity per job. Completions beyond this apply backpressure to
/// the caller rather than being dropped.
const MAILBOX_CAPACITY: usize = 256;

/// The external collaborators a runner needs.
#[derive(Clone)]
pub struct Services {
    /// Where pipeline definitions come from.
    pub source: Arc<dyn PipelineSource>,
    /// Where ready tasks go.
    pub tasks: Arc<dyn TaskSink>,
    /// Storage for values above the inlining threshold.
    pub storage: Arc<dyn ValueStorage>,
    /// Receives a graph projection after every state change.
    pub snapshots: Arc<dyn SnapshotSink>,
    /// Receives exactly one write at terminal pipeline state.
    pub status: Arc<dyn StatusSink>,
    /// Receives lifecycle events.
    pub events: Arc<dyn EventSink>,
}

/// Events delivered to a job's mailbox.
#[derive(Debug)]
enum JobEvent {
    /// A worker reported a task terminal state.
    Completion(TaskCompletion),
    /// Stop the run.
    Stop,
}

/// A registered run: its mailbox plus a token identifying this particular
/// run, so a replaced entry is never cleaned up by its predecessor.
struct JobHandle {
    run_token: Uuid,
    tx: mpsc::Sender<JobEvent>,
}

/// Registry of running jobs and the entry point for inbound events.
pub struct JobRegistry {
    services: Services,
    jobs: Arc<DashMap<String, JobHandle>>,
}

impl JobRegistry {
    /// Creates a registry with no running jobs.
    #[must_use]
    pub fn new(services: Services) -> Self {
        Self {
            services,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Fetches, validates and starts the pipeline for a job.
    ///
    /// Validation happens entirely before any task is dispatched; a
    /// definition that fails to build starts nothing.
    ///
    /// # Errors
    ///
    /// `PipelineNotFound` when the source has no definition for the job,
    /// any build error from graph construction, or `Internal` when the job
    /// id is already running.
    pub async fn start_job(&self, job_id: &str) -> Result<(), HiveflowError> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let run_token = generate_uuid();

        // Reserve the slot before any await, so a concurrent start for the
        // same id fails here rather than spawning a second event loop.
        match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(HiveflowError::Internal(format!(
                    "job '{job_id}' is already running"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(JobHandle { run_token, tx });
            }
        }

        let prepared = async {
            let descriptor = self.services.source.fetch_pipeline(job_id).await?;
            JobExecution::new(job_id, descriptor)
        }
        .await;
        let job = match prepared {
            Ok(job) => job,
            Err(err) => {
                self.jobs
                    .remove_if(job_id, |_, handle| handle.run_token == run_token);
                return Err(err);
            }
        };

        let services = self.services.clone();
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            run_job(job, rx, services, jobs, run_token).await;
        });
        Ok(())
    }

    /// Routes a worker-reported completion to its job.
    ///
    /// Completions for unknown or already-finished jobs are dropped with a
    /// debug log; an at-least-once queue legitimately delivers late.
    pub async fn complete_task(&self, completion: TaskCompletion) {
        let sender = self
            .jobs
            .get(&completion.job_id)
            .map(|entry| entry.value().tx.clone());
        match sender {
            Some(tx) => {
                if tx.send(JobEvent::Completion(completion)).await.is_err() {
                    debug!("completion raced with job shutdown");
                }
            }
            None => {
                debug!(job_id = %completion.job_id, "completion for unknown job");
            }
        }
    }

    /// Requests a stop for a running job.
    ///
    /// # Errors
    ///
    /// `PipelineNotFound` when the job is not running.
    pub async fn stop_job(&self, job_id: &str) -> Result<(), HiveflowError> {
        let sender = self
            .jobs
            .get(job_id)
            .map(|entry| entry.value().tx.clone())
            .ok_or_else(|| HiveflowError::PipelineNotFound {
                job_id: job_id.to_string(),
            })?;
        // A send failure means the job terminated on its own; the intent of
        // the stop is already satisfied.
        let _ = sender.send(JobEvent::Stop).await;
        Ok(())
    }

    /// True while a job has a live event loop.
    #[must_use]
    pub fn is_running(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Number of jobs with a live event loop.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.jobs.len()
    }
}

/// The single-writer event loop for one job.
async fn run_job(
    mut job: JobExecution,
    mut rx: mpsc::Receiver<JobEvent>,
    services: Services,
    jobs: Arc<DashMap<String, JobHandle>>,
    run_token: Uuid,
) {
    let job_id = job.job_id().to_string();

    services
        .events
        .emit(
            names::PIPELINE_STARTED,
            Some(json!({"jobId": job_id, "pipeline": job.descriptor().name})),
        )
        .await;

    let progress = job.start();
    let mut outcome = handle_progress(&mut job, progress, &services).await;

    while outcome.is_none() {
        let Some(event) = rx.recv().await else {
            // All senders dropped: the registry itself is shutting down.
            warn!(job_id = %job_id, "event channel closed before terminal state");
            break;
        };
        let progress = match event {
            JobEvent::Completion(completion) => {
                let completion = internalize_result(completion, &services).await;
                let progress = job.on_task_completed(&completion);
                services
                    .events
                    .emit(
                        names::TASK_COMPLETED,
                        Some(json!({
                            "jobId": job_id,
                            "nodeName": completion.node_name,
                            "taskIndex": completion.task_index,
                            "status": completion.status,
                        })),
                    )
                    .await;
                progress
            }
            JobEvent::Stop => job.stop(),
        };
        outcome = handle_progress(&mut job, progress, &services).await;
    }

    if let Some(outcome) = outcome {
        let threshold = job.descriptor().options.inline_threshold_bytes;
        finalize(&job_id, outcome, threshold, &services).await;
    }
    // Remove only this run's own registration.
    jobs.remove_if(&job_id, |_, handle| handle.run_token == run_token);
}

/// Dispatches ready tasks and records the post-change snapshot.
///
/// Returns the terminal outcome once the run finished.
async fn handle_progress(
    job: &mut JobExecution,
    progress: Progress,
    services: &Services,
) -> Option<PipelineOutcome> {
    let job_id = job.job_id().to_string();
    let mut outcome = progress.outcome;

    if !progress.ready_tasks.is_empty() {
        let threshold = job.descriptor().options.inline_threshold_bytes;
        let mut assignments = Vec::with_capacity(progress.ready_tasks.len());
        for mut assignment in progress.ready_tasks {
            match maybe_externalize(assignment.input, threshold, services.storage.as_ref()).await
            {
                Ok(input) => assignment.input = input,
                Err(err) => {
                    error!(job_id = %job_id, node = %assignment.node_name, error = %err,
                        "failed to externalize task input");
                    let stop = job.stop();
                    return Some(stop.outcome.unwrap_or(PipelineOutcome::Stopped));
                }
            }
            assignments.push(assignment);
        }

        let count = assignments.len();
        if let Err(err) = services.tasks.enqueue_tasks(&job_id, assignments).await {
            error!(job_id = %job_id, error = %err, "task dispatch failed");
            let stop = job.stop();
            outcome = Some(stop.outcome.unwrap_or(PipelineOutcome::Stopped));
        } else {
            services
                .events
                .emit(
                    names::TASKS_DISPATCHED,
                    Some(json!({"jobId": job_id, "count": count})),
                )
                .await;
        }
    }

    let snapshot = GraphSnapshot::capture(job);
    if let Err(err) = services.snapshots.write_snapshot(&job_id, &snapshot).await {
        warn!(job_id = %job_id, error = %err, "snapshot write failed");
    }

    outcome
}

/// Replaces a pointer result with the stored value it points at.
///
/// Workers may store large results themselves and report only the pointer;
/// downstream reference resolution needs the real value.
async fn internalize_result(mut completion: TaskCompletion, services: &Services) -> TaskCompletion {
    if let Some(info) = completion.result.as_ref().and_then(as_pointer) {
        match services.storage.get_value(&info).await {
            Ok(value) => completion.result = Some(value),
            Err(err) => {
                warn!(
                    node = %completion.node_name,
                    path = %info.path,
                    error = %err,
                    "failed to fetch stored result, keeping pointer"
                );
            }
        }
    }
    completion
}

/// Writes the single terminal status and emits the matching event.
async fn finalize(
    job_id: &str,
    outcome: PipelineOutcome,
    threshold: usize,
    services: &Services,
) {
    let outcome = match outcome {
        PipelineOutcome::Completed { results } => {
            // Aggregate results can exceed the inline threshold just like
            // task inputs; oversized ones land in storage.
            let results = maybe_externalize(results, threshold, services.storage.as_ref())
                .await
                .unwrap_or_else(|err| {
                    warn!(job_id = %job_id, error = %err, "failed to externalize results");
                    serde_json::Value::Null
                });
            PipelineOutcome::Completed { results }
        }
        other => other,
    };

    let event = match &outcome {
        PipelineOutcome::Completed { .. } => names::PIPELINE_COMPLETED,
        PipelineOutcome::Failed { .. } => names::PIPELINE_FAILED,
        PipelineOutcome::Stopped => names::PIPELINE_STOPPED,
    };

    let status = FinalStatus::new(outcome);
    if let Err(err) = services.status.write_status(job_id, &status).await {
        error!(job_id = %job_id, error = %err, "final status write failed");
    }
    info!(job_id = %job_id, event = %event, "pipeline run finished");
    services
        .events
        .emit(event, Some(json!({"jobId": job_id})))
        .await;
}
