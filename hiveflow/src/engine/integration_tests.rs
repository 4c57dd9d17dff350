//! End-to-end engine tests over in-memory collaborators.

use super::*;
use crate::events::{CollectingEventSink, NoOpEventSink};
use crate::interfaces::ValueStorage;
use crate::spec::{PipelineDescriptor, PipelineNode, PipelineOptions};
use crate::state::ExecutionState;
use crate::storage::{as_pointer, pointer_value};
use crate::testing::{
    batch_pipeline, diamond_pipeline, linear_pipeline, EchoWorker, InMemoryPipelineSource,
    InMemoryValueStorage, RecordingSnapshotSink, RecordingStatusSink,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn succeed(job_id: &str, node: &str, index: Option<usize>, result: serde_json::Value) -> TaskCompletion {
    TaskCompletion {
        job_id: job_id.to_string(),
        node_name: node.to_string(),
        task_index: index,
        status: CompletionStatus::Succeed,
        result: Some(result),
        error: None,
    }
}

#[test]
fn test_diamond_runs_in_wave_order() {
    let mut job = JobExecution::new("diamond-1", diamond_pipeline()).unwrap();

    let p = job.start();
    assert_eq!(p.ready_tasks.len(), 1);
    assert_eq!(p.ready_tasks[0].node_name, "top");

    let p = job.on_task_completed(&succeed("diamond-1", "top", None, json!(1)));
    let mut wave: Vec<&str> = p.ready_tasks.iter().map(|t| t.node_name.as_str()).collect();
    wave.sort_unstable();
    assert_eq!(wave, vec!["left", "right"]);

    // Half the join is not enough.
    let p = job.on_task_completed(&succeed("diamond-1", "left", None, json!(2)));
    assert!(p.ready_tasks.is_empty());

    let p = job.on_task_completed(&succeed("diamond-1", "right", None, json!(3)));
    assert_eq!(p.ready_tasks.len(), 1);
    assert_eq!(p.ready_tasks[0].node_name, "bottom");
    assert_eq!(p.ready_tasks[0].input, json!([2, 3]));

    let p = job.on_task_completed(&succeed("diamond-1", "bottom", None, json!(5)));
    assert_eq!(
        p.outcome,
        Some(PipelineOutcome::Completed {
            results: json!({"top": 1, "left": 2, "right": 3, "bottom": 5})
        })
    );
}

#[test]
fn test_scatter_map_reduce_round_trip() {
    let mut job = JobExecution::new("batch-1", batch_pipeline()).unwrap();
    job.start();

    let p = job.on_task_completed(&succeed("batch-1", "scatter", None, json!({"items": [1, 2, 3]})));
    assert_eq!(p.ready_tasks.len(), 3);

    for (i, task) in p.ready_tasks.iter().enumerate() {
        assert_eq!(task.node_name, "map");
        assert_eq!(task.batch_index, Some(i));
    }

    for i in 0..3 {
        job.on_task_completed(&succeed("batch-1", "map", Some(i), json!((i + 1) * 10)));
    }

    // The reducer sees the ordered per-task aggregate.
    let snapshot = GraphSnapshot::capture(&job);
    assert_eq!(snapshot.node("map").unwrap().state, ExecutionState::Succeed);
    assert_eq!(snapshot.node("map").unwrap().result, Some(json!([10, 20, 30])));

    let p = job.on_task_completed(&succeed("batch-1", "reduce", None, json!(60)));
    match p.outcome {
        Some(PipelineOutcome::Completed { results }) => {
            assert_eq!(results["reduce"], json!(60));
            assert_eq!(results["map"], json!([10, 20, 30]));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

fn services(
    source: Arc<InMemoryPipelineSource>,
    tasks: Arc<dyn crate::interfaces::TaskSink>,
    storage: Arc<InMemoryValueStorage>,
    snapshots: Arc<RecordingSnapshotSink>,
    status: Arc<RecordingStatusSink>,
    events: Arc<dyn crate::events::EventSink>,
) -> Services {
    Services {
        source,
        tasks,
        storage,
        snapshots,
        status,
        events,
    }
}

#[tokio::test]
async fn test_registry_runs_linear_pipeline_to_completion() {
    let source = Arc::new(InMemoryPipelineSource::new());
    source.insert("job-lin", linear_pipeline());
    let (worker, mut assignments) = EchoWorker::new();
    let storage = Arc::new(InMemoryValueStorage::new());
    let snapshots = Arc::new(RecordingSnapshotSink::new());
    let status = Arc::new(RecordingStatusSink::new());
    let events = Arc::new(CollectingEventSink::new());

    let registry = Arc::new(JobRegistry::new(services(
        source,
        worker,
        storage,
        Arc::clone(&snapshots),
        Arc::clone(&status),
        Arc::clone(&events) as Arc<dyn crate::events::EventSink>,
    )));

    registry.start_job("job-lin").await.unwrap();
    assert!(registry.is_running("job-lin"));

    // Play the worker side: echo every input back as the result.
    let echo_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        while let Some((job_id, task)) = assignments.recv().await {
            echo_registry
                .complete_task(succeed(&job_id, &task.node_name, task.batch_index, task.input))
                .await;
        }
    });

    let (job_id, final_status) = status.wait_written().await;
    assert_eq!(job_id, "job-lin");
    match final_status.outcome {
        PipelineOutcome::Completed { results } => {
            let results = results.as_object().unwrap();
            assert!(results.contains_key("first"));
            assert!(results.contains_key("second"));
            assert!(results.contains_key("third"));
            assert_eq!(results["first"], json!([1]));
        }
        other => panic!("expected completion, got {other:?}"),
    }

    // Exactly one terminal write, and the lifecycle events bracket the run.
    assert_eq!(status.statuses().len(), 1);
    let types = events.types_with_prefix("pipeline.");
    assert_eq!(types.first().map(String::as_str), Some("pipeline.started"));
    assert_eq!(types.last().map(String::as_str), Some("pipeline.completed"));

    let latest = snapshots.latest().unwrap();
    assert!(latest
        .nodes
        .iter()
        .all(|n| n.state == ExecutionState::Succeed));
}

#[tokio::test]
async fn test_registry_stop_writes_stopped_status() {
    let source = Arc::new(InMemoryPipelineSource::new());
    source.insert("job-stop", linear_pipeline());
    let (worker, mut assignments) = EchoWorker::new();
    let status = Arc::new(RecordingStatusSink::new());

    let registry = JobRegistry::new(services(
        source,
        worker,
        Arc::new(InMemoryValueStorage::new()),
        Arc::new(RecordingSnapshotSink::new()),
        Arc::clone(&status),
        Arc::new(NoOpEventSink),
    ));

    registry.start_job("job-stop").await.unwrap();
    // Wait for the first dispatch, then leave the task hanging and stop.
    let (_, first) = assignments.recv().await.unwrap();
    assert_eq!(first.node_name, "first");
    registry.stop_job("job-stop").await.unwrap();

    let (_, final_status) = status.wait_written().await;
    assert_eq!(final_status.outcome, PipelineOutcome::Stopped);
    assert_eq!(status.statuses().len(), 1);

    // Stopping a job that is not running reports the lookup failure.
    assert!(registry.stop_job("no-such-job").await.is_err());
}

/// Pipeline source that parks every fetch until the test opens the gate,
/// keeping a `start_job` call suspended mid-flight.
struct GatedSource {
    descriptor: PipelineDescriptor,
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait::async_trait]
impl crate::interfaces::PipelineSource for GatedSource {
    async fn fetch_pipeline(
        &self,
        _job_id: &str,
    ) -> Result<PipelineDescriptor, crate::errors::HiveflowError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| crate::errors::HiveflowError::Internal("gate closed".to_string()))?;
        permit.forget();
        Ok(self.descriptor.clone())
    }
}

#[tokio::test]
async fn test_concurrent_starts_for_one_job_spawn_a_single_run() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let source = Arc::new(GatedSource {
        descriptor: linear_pipeline(),
        gate: Arc::clone(&gate),
    });
    let (worker, mut assignments) = EchoWorker::new();
    let status = Arc::new(RecordingStatusSink::new());

    let registry = Arc::new(JobRegistry::new(Services {
        source,
        tasks: worker,
        storage: Arc::new(InMemoryValueStorage::new()),
        snapshots: Arc::new(RecordingSnapshotSink::new()),
        status: Arc::clone(&status) as Arc<dyn crate::interfaces::StatusSink>,
        events: Arc::new(NoOpEventSink),
    }));

    // The first start reserves the job id, then suspends inside the
    // gated fetch.
    let first_registry = Arc::clone(&registry);
    let first = tokio::spawn(async move { first_registry.start_job("job-race").await });
    while !registry.is_running("job-race") {
        tokio::task::yield_now().await;
    }

    // A second start for the same id loses immediately, without touching
    // the source.
    let err = registry.start_job("job-race").await.unwrap_err();
    assert!(matches!(err, crate::errors::HiveflowError::Internal(_)));

    gate.add_permits(1);
    first.await.unwrap().unwrap();

    // Exactly one event loop exists, so the entry node dispatches once.
    let (_, task) = assignments.recv().await.unwrap();
    assert_eq!(task.node_name, "first");

    registry.stop_job("job-race").await.unwrap();
    let (_, final_status) = status.wait_written().await;
    assert_eq!(final_status.outcome, PipelineOutcome::Stopped);
    assert_eq!(status.statuses().len(), 1);
    assert!(assignments.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_fetch_releases_the_job_slot() {
    let gate = Arc::new(tokio::sync::Semaphore::new(1));
    gate.close();
    let source = Arc::new(GatedSource {
        descriptor: linear_pipeline(),
        gate,
    });
    let registry = JobRegistry::new(Services {
        source,
        tasks: Arc::new(crate::testing::RecordingTaskSink::new()),
        storage: Arc::new(InMemoryValueStorage::new()),
        snapshots: Arc::new(RecordingSnapshotSink::new()),
        status: Arc::new(RecordingStatusSink::new()),
        events: Arc::new(NoOpEventSink),
    });

    assert!(registry.start_job("job-gone").await.is_err());
    // The reservation does not leak; the id is free again.
    assert!(!registry.is_running("job-gone"));
    assert_eq!(registry.running_count(), 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let registry = JobRegistry::new(services(
        Arc::new(InMemoryPipelineSource::new()),
        Arc::new(crate::testing::RecordingTaskSink::new()),
        Arc::new(InMemoryValueStorage::new()),
        Arc::new(RecordingSnapshotSink::new()),
        Arc::new(RecordingStatusSink::new()),
        Arc::new(NoOpEventSink),
    ));

    let err = registry.start_job("missing").await.unwrap_err();
    assert!(matches!(
        err,
        crate::errors::HiveflowError::PipelineNotFound { .. }
    ));
}

#[tokio::test]
async fn test_oversized_input_is_externalized_before_dispatch() {
    let descriptor = PipelineDescriptor::new(
        "big",
        vec![PipelineNode::new("only", "alg").with_input(vec![json!("@flowInput.blob")])],
    )
    .with_flow_input(json!({"blob": "x".repeat(256)}))
    .with_options(PipelineOptions {
        inline_threshold_bytes: 64,
        ..PipelineOptions::default()
    });

    let source = Arc::new(InMemoryPipelineSource::new());
    source.insert("job-big", descriptor);
    let (worker, mut assignments) = EchoWorker::new();
    let storage = Arc::new(InMemoryValueStorage::new());
    let status = Arc::new(RecordingStatusSink::new());

    let registry = JobRegistry::new(services(
        source,
        worker,
        Arc::clone(&storage),
        Arc::new(RecordingSnapshotSink::new()),
        Arc::clone(&status),
        Arc::new(NoOpEventSink),
    ));

    registry.start_job("job-big").await.unwrap();
    let (job_id, task) = assignments.recv().await.unwrap();

    let pointer = as_pointer(&task.input).expect("oversized input should be a pointer");
    assert_eq!(storage.len(), 1);
    assert_eq!(
        storage.get_value(&pointer).await.unwrap(),
        json!(["x".repeat(256)])
    );

    registry
        .complete_task(succeed(&job_id, &task.node_name, None, json!("ok")))
        .await;
    let (_, final_status) = status.wait_written().await;
    assert!(matches!(
        final_status.outcome,
        PipelineOutcome::Completed { .. }
    ));
}

#[tokio::test]
async fn test_pointer_results_are_fetched_before_resolution() {
    let source = Arc::new(InMemoryPipelineSource::new());
    source.insert("job-ptr", linear_pipeline());
    let (worker, mut assignments) = EchoWorker::new();
    let storage = Arc::new(InMemoryValueStorage::new());
    let status = Arc::new(RecordingStatusSink::new());

    let registry = JobRegistry::new(services(
        source,
        worker,
        Arc::clone(&storage),
        Arc::new(RecordingSnapshotSink::new()),
        Arc::clone(&status),
        Arc::new(NoOpEventSink),
    ));

    registry.start_job("job-ptr").await.unwrap();

    // The first worker stores its result itself and reports a pointer.
    let (job_id, first) = assignments.recv().await.unwrap();
    assert_eq!(first.node_name, "first");
    let info = storage.put_value(json!({"big": true})).await.unwrap();
    registry
        .complete_task(succeed(&job_id, "first", None, pointer_value(&info)))
        .await;

    // The second node resolves against the stored value, not the pointer.
    let (job_id, second) = assignments.recv().await.unwrap();
    assert_eq!(second.node_name, "second");
    assert_eq!(second.input, json!([{"big": true}]));

    registry
        .complete_task(succeed(&job_id, "second", None, json!(2)))
        .await;
    let (job_id, third) = assignments.recv().await.unwrap();
    registry
        .complete_task(succeed(&job_id, "third", None, json!(3)))
        .await;

    let (_, final_status) = status.wait_written().await;
    assert!(matches!(
        final_status.outcome,
        PipelineOutcome::Completed { .. }
    ));
}
