//! End-to-end pipeline runs against the in-memory graph

mod helpers;

use graft_common::config::GraphSchema;
use graft_common::ImportEvent;
use graft_import::graph::MemoryGraph;
use graft_import::models::{ConnectorKind, PipelineStep, WorkflowStatus};
use graft_import::{PipelineError, RunOptions};
use helpers::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn test_full_run_completes_and_records_metrics() {
    let tmp = TempDir::new().unwrap();
    let extract = write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let id = Uuid::new_v4();

    let state = pipeline
        .run(&request("olympus"), id, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.current_step, None);
    assert_eq!(
        state.steps_completed,
        vec![PipelineStep::Fetch, PipelineStep::Cut, PipelineStep::Split, PipelineStep::Load]
    );
    assert_eq!(state.message.as_deref(), Some("Successfully processed olympus for 20250102"));
    assert!(state.ended_at.is_some());

    assert_eq!(state.metric_u64("bytes_fetched"), Some(EXTRACT.len() as u64));
    assert_eq!(state.metric_u64("rows_after_cut"), Some(3));
    assert_eq!(state.metric_u64("split_files_count"), Some(2));
    assert_eq!(state.metric_u64("nodes_created"), Some(5));
    assert_eq!(state.metric_u64("relationships_created"), Some(3));
    assert_eq!(state.metric_u64("rows_skipped"), Some(0));
    assert!(!state.metrics.contains_key("load_failed_files"));

    // fetched copy + processed file + two partitions
    let dropbox = tmp.path().join("dropbox");
    assert_eq!(state.files_created.len(), 4);
    assert_eq!(state.files_created[0], dropbox.join(format!("txn_{}.dat", COB)));
    assert_eq!(
        state.files_created[1],
        dropbox.join(COB).join(format!("processed_{}.dat", COB))
    );
    let split_dir = dropbox.join(COB).join("split");
    assert!(state.files_created.contains(&split_dir.join(format!("split_{}-G1.csv", COB))));
    assert!(state.files_created.contains(&split_dir.join(format!("split_{}-G2.csv", COB))));
    assert!(extract.exists());

    let schema = GraphSchema::default();
    assert_eq!(graph.summary_count().await, 2);
    assert_eq!(graph.detail_count().await, 3);
    assert!(graph.has_edge(&schema, "T3", "G2").await);

    // The store holds exactly the returned terminal state
    assert_eq!(pipeline.store().get(id).await.unwrap(), state);
}

#[tokio::test]
async fn test_replay_under_new_id_creates_nothing() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);

    let first = pipeline
        .run(&request("olympus"), Uuid::new_v4(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    let second = pipeline
        .run(&request("olympus"), Uuid::new_v4(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.metric_u64("nodes_created"), Some(5));
    assert_eq!(second.status, WorkflowStatus::Completed);
    assert_eq!(second.metric_u64("nodes_created"), Some(0));
    assert_eq!(second.metric_u64("relationships_created"), Some(0));
    // Re-split truncates instead of appending
    assert_eq!(second.metric_u64("split_files_count"), Some(2));
    assert_eq!(graph.detail_count().await, 3);
    assert_eq!(graph.relationship_count().await, 3);
}

#[tokio::test]
async fn test_unreachable_source_fails_before_any_processing() {
    let tmp = TempDir::new().unwrap();
    let dropbox = tmp.path().join("dropbox");
    let resolver = catalog(
        "olympus",
        source(ConnectorKind::Http, "http://127.0.0.1:1/v1/txn_{cob}"),
    );
    let graph = MemoryGraph::new();
    let pipeline = pipeline(resolver, settings(&dropbox), &graph);
    let id = Uuid::new_v4();

    let err = pipeline
        .run(&request("olympus"), id, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(_)), "unexpected error: {err}");

    let state = pipeline.store().get(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.current_step, Some(PipelineStep::Fetch));
    assert!(state.steps_completed.is_empty());
    assert!(state.files_created.is_empty());
    assert!(state.message.unwrap().contains("Transfer failed"));

    assert!(!dropbox.join(COB).exists());
    assert_eq!(graph.schema_calls().await, 0);
}

#[tokio::test]
async fn test_missing_source_config_fails_before_io() {
    let tmp = TempDir::new().unwrap();
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let id = Uuid::new_v4();

    let err = pipeline
        .run(&request("unknown"), id, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));

    let state = pipeline.store().get(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.current_step, Some(PipelineStep::Initializing));
    assert!(!tmp.path().join("dropbox").exists());
}

#[tokio::test]
async fn test_missing_local_source_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);

    let err = pipeline
        .run(&request("olympus"), Uuid::new_v4(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Source not found"));
}

#[tokio::test]
async fn test_skipped_phases_pass_output_through() {
    let tmp = TempDir::new().unwrap();
    // Already cut: comma-delimited with a header
    let feeds = tmp.path().join("feeds");
    std::fs::create_dir_all(&feeds).unwrap();
    std::fs::write(
        feeds.join(format!("txn_{}.dat", COB)),
        "transaction_id,gfcid,mtm_usd_amount\nT1,G1,5.0\nT2,G2,6.0\n",
    )
    .unwrap();

    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let options = RunOptions {
        skip_fetch: true,
        skip_cut: true,
        ..RunOptions::default()
    };

    let state = pipeline
        .run(&request("olympus"), Uuid::new_v4(), options, CancellationToken::new())
        .await
        .unwrap();

    // Skipped phases are still entered and completed
    assert_eq!(state.steps_completed.len(), 4);
    assert!(!state.metrics.contains_key("bytes_fetched"));
    assert!(!state.metrics.contains_key("rows_after_cut"));
    assert_eq!(state.metric_u64("split_files_count"), Some(2));
    assert_eq!(state.files_created.len(), 2);
    assert_eq!(graph.detail_count().await, 2);
}

#[tokio::test]
async fn test_skip_load_leaves_graph_untouched() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let options = RunOptions {
        skip_load: true,
        ..RunOptions::default()
    };

    let state = pipeline
        .run(&request("olympus"), Uuid::new_v4(), options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert!(!state.metrics.contains_key("nodes_created"));
    assert_eq!(graph.schema_calls().await, 0);
    assert_eq!(graph.summary_count().await, 0);
}

#[tokio::test]
async fn test_per_file_load_failure_is_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let partitions = tmp.path().join("partitions");
    write_partition(&partitions, "G1", "transaction_id,gfcid,mtm_usd_amount\nT1,G1,1.0\nT2,G1,2.0\n");
    let bad = write_partition(&partitions, "G2", "transaction_id,gfcid,mtm_usd_amount\nT3,G2\n");
    write_partition(&partitions, "G3", "transaction_id,gfcid,mtm_usd_amount\nT4,G3,4.0\n");

    let resolver = catalog(
        "olympus",
        source(ConnectorKind::Local, partitions.to_string_lossy().into_owned()),
    );
    let graph = MemoryGraph::new();
    let pipeline = pipeline(resolver, settings(&tmp.path().join("dropbox")), &graph);
    let options = RunOptions {
        skip_fetch: true,
        skip_cut: true,
        skip_split: true,
        ..RunOptions::default()
    };

    let state = pipeline
        .run(&request("olympus"), Uuid::new_v4(), options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.metric_u64("files_loaded"), Some(2));
    // G1 + G3 summaries, T1 T2 T4 details
    assert_eq!(state.metric_u64("nodes_created"), Some(5));
    assert_eq!(state.metric_u64("relationships_created"), Some(3));
    assert_eq!(
        state.metrics["load_failed_files"],
        serde_json::json!([bad.display().to_string()])
    );
}

#[tokio::test]
async fn test_lost_graph_connection_fails_run() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    graph.set_unreachable(true);
    let pipeline = local_pipeline(tmp.path(), &graph);
    let id = Uuid::new_v4();

    let err = pipeline
        .run(&request("olympus"), id, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Load(_)));

    let state = pipeline.store().get(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.current_step, Some(PipelineStep::Load));
    assert_eq!(state.steps_completed.len(), 3);
}

#[tokio::test]
async fn test_cancelled_run_stops_before_next_phase() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .run(&request("olympus"), id, RunOptions::default(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));

    let state = pipeline.store().get(id).await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(state.steps_completed.is_empty());
    assert!(!tmp.path().join("dropbox").exists());
    // Token is released once the run ends
    assert!(!pipeline.store().cancel(id).await);
}

#[tokio::test]
async fn test_events_follow_every_transition() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);
    let mut rx = pipeline.event_bus().subscribe();
    let id = Uuid::new_v4();

    pipeline
        .run(&request("olympus"), id, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.workflow_id(), id);
        events.push(event);
    }

    assert_eq!(events.len(), 6);
    assert!(matches!(events[0], ImportEvent::WorkflowStarted { .. }));
    let steps: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ImportEvent::StepChanged { new_status, .. } => Some(new_status.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec!["FETCHING", "CUTTING", "SPLITTING", "LOADING"]);
    assert!(matches!(events[5], ImportEvent::WorkflowCompleted { .. }));
}

#[tokio::test]
async fn test_post_load_aggregate_runs_after_clean_load() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let template = tmp.path().join("feeds").join("txn_{cob}.dat");
    let resolver = catalog(
        "olympus",
        source(ConnectorKind::Local, template.to_string_lossy().into_owned()),
    );
    let graph = MemoryGraph::new();
    let pipeline = pipeline(resolver, with_aggregate(settings(&tmp.path().join("dropbox"))), &graph);

    pipeline
        .run(&request("olympus"), Uuid::new_v4(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let schema = GraphSchema::default();
    assert_eq!(graph.summary_property(&schema, "G1", "detail_count").await, Some(2.0));
    assert_eq!(
        graph.summary_property(&schema, "G1", "total_mtm_usd_amount").await,
        Some(12.5)
    );
}

#[tokio::test]
async fn test_spawned_run_keeps_its_pending_start_time() {
    let tmp = TempDir::new().unwrap();
    write_extract(tmp.path());
    let graph = MemoryGraph::new();
    let pipeline = local_pipeline(tmp.path(), &graph);

    let id = pipeline
        .spawn(request("olympus"), RunOptions::default())
        .await
        .unwrap();
    let pending = pipeline.store().get(id).await.unwrap();

    let mut state = pending.clone();
    for _ in 0..100 {
        state = pipeline.store().get(id).await.unwrap();
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.started_at, pending.started_at);
    assert_eq!(pipeline.store().list().await.len(), 1);
    assert_eq!(graph.detail_count().await, 3);
}
