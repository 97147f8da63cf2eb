//! Import workflow orchestration
//!
//! Runs fetch → cut → split → load strictly in sequence for one
//! [`ImportRequest`], recording progress in a [`WorkflowState`] that is
//! written to the [`WorkflowStore`] before each phase's work begins.
//!
//! Configuration is resolved and validated before any I/O. A skipped phase is
//! still entered, and its output is the previous phase's output unchanged.
//! Any failure moves the run to FAILED (or CANCELLED) with the causing
//! message and is returned to the caller.

pub mod store;

use chrono::Utc;
use graft_common::{EventBus, ImportEvent, ImportSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ConfigResolver};
use crate::connectors::{Connector, FetchError};
use crate::graph::{GraphBackend, GraphLoader, LoadError, LoadOptions};
use crate::models::{
    ImportRequest, LoadResult, PipelineStep, ProcessResult, TransitionError, WorkflowState,
    WorkflowStatus,
};
use crate::processors::{DataProcessor, ProcessingError};

pub use store::WorkflowStore;

/// Run failure, by phase
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Processing(ProcessingError),

    #[error(transparent)]
    Load(LoadError),

    #[error("Import cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

impl From<ProcessingError> for PipelineError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::Cancelled => PipelineError::Cancelled,
            ProcessingError::Config(e) => PipelineError::Configuration(e),
            other => PipelineError::Processing(other),
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Load(other),
        }
    }
}

/// Per-run phase skip flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub skip_fetch: bool,
    pub skip_cut: bool,
    pub skip_split: bool,
    pub skip_load: bool,
}

/// Phase state machine over resolvers, connectors, processors and the loader
pub struct ImportPipeline {
    resolver: Arc<dyn ConfigResolver>,
    settings: Arc<ImportSettings>,
    store: WorkflowStore,
    graph: Arc<dyn GraphBackend>,
    event_bus: EventBus,
}

impl ImportPipeline {
    pub fn new(
        resolver: Arc<dyn ConfigResolver>,
        settings: Arc<ImportSettings>,
        store: WorkflowStore,
        graph: Arc<dyn GraphBackend>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            resolver,
            settings,
            store,
            graph,
            event_bus,
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Launch a run in the background and return its id immediately
    ///
    /// The PENDING state and the cancellation token are registered before
    /// this returns, so the id can be polled or cancelled right away.
    pub async fn spawn(self: &Arc<Self>, request: ImportRequest, options: RunOptions) -> Result<Uuid, PipelineError> {
        request.validate()?;

        let workflow_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.store.put(&WorkflowState::new(workflow_id)).await;
        self.store.register_token(workflow_id, cancel.clone()).await;

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.run(&request, workflow_id, options, cancel).await {
                Ok(state) => info!(
                    workflow_id = %workflow_id,
                    status = %state.status,
                    "Background import finished"
                ),
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "Background import ended with error"),
            }
        });

        Ok(workflow_id)
    }

    /// Run every phase for `request` and return the terminal state
    pub async fn run(
        &self,
        request: &ImportRequest,
        workflow_id: Uuid,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, PipelineError> {
        // A spawned run already holds its PENDING state and token
        let mut state = match self.store.get(workflow_id).await {
            Some(pending) => pending,
            None => {
                let state = WorkflowState::new(workflow_id);
                self.store.put(&state).await;
                self.store.register_token(workflow_id, cancel.clone()).await;
                state
            }
        };

        info!(
            workflow_id = %workflow_id,
            domain_type = %request.domain_type,
            domain_name = %request.domain_name,
            cob_date = %request.cob_date,
            "Import started"
        );
        self.event_bus.emit_lossy(ImportEvent::WorkflowStarted {
            workflow_id,
            domain_type: request.domain_type.clone(),
            domain_name: request.domain_name.clone(),
            cob_date: request.cob_date_compact(),
            timestamp: Utc::now(),
        });

        let outcome = self.execute(&mut state, request, options, &cancel).await;
        self.store.remove_token(workflow_id).await;

        match outcome {
            Ok(()) => {
                state.transition_to(WorkflowStatus::Completed)?;
                let message = format!(
                    "Successfully processed {} for {}",
                    request.domain_name,
                    request.cob_date_compact()
                );
                state.message = Some(message.clone());
                self.store.put(&state).await;
                self.event_bus.emit_lossy(ImportEvent::WorkflowCompleted {
                    workflow_id,
                    message,
                    timestamp: Utc::now(),
                });
                info!(workflow_id = %workflow_id, "Import completed");
                Ok(state)
            }
            Err(e) => {
                self.finish_with_error(&mut state, &e).await;
                Err(e)
            }
        }
    }

    async fn finish_with_error(&self, state: &mut WorkflowState, err: &PipelineError) {
        let workflow_id = state.workflow_id;
        let step = state.current_step.map(|s| s.as_str().to_string());
        let status = match err {
            PipelineError::Cancelled => WorkflowStatus::Cancelled,
            _ => WorkflowStatus::Failed,
        };

        if let Err(e) = state.transition_to(status) {
            warn!(workflow_id = %workflow_id, error = %e, "Terminal transition rejected");
        }
        state.message = Some(err.to_string());
        self.store.put(state).await;

        if status == WorkflowStatus::Cancelled {
            info!(workflow_id = %workflow_id, step = ?step, "Import cancelled");
            self.event_bus.emit_lossy(ImportEvent::WorkflowCancelled {
                workflow_id,
                step,
                timestamp: Utc::now(),
            });
        } else {
            error!(workflow_id = %workflow_id, step = ?step, error = %err, "Import failed");
            self.event_bus.emit_lossy(ImportEvent::WorkflowFailed {
                workflow_id,
                step,
                error: err.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn execute(
        &self,
        state: &mut WorkflowState,
        request: &ImportRequest,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        // Everything that can be rejected without I/O
        request.validate()?;
        let source = self
            .resolver
            .resolve_source(&request.domain_type, &request.domain_name)?;
        let columns = self.resolver.resolve_columns(&request.domain_name);
        columns.validate()?;
        let delimiter = columns.output_delimiter_byte()?;
        let connector = if options.skip_fetch {
            None
        } else {
            Some(Connector::from_config(&source, &self.settings)?)
        };

        let cob = request.cob_date_compact();
        let processor = DataProcessor::new(columns, &self.settings.dropbox_dir, cob.clone());
        let source_path = source.source_path(&cob);

        // Fetch
        self.enter(state, PipelineStep::Fetch, cancel).await?;
        let fetched = match connector {
            Some(connector) => {
                let dest = self.destination(&source_path, request);
                let result = tokio::select! {
                    result = connector.fetch(&source_path, &dest) => result?,
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                };
                state.record_file(&result.local_path);
                state.record_metric("bytes_fetched", result.bytes_transferred);
                result.local_path
            }
            None => {
                info!(workflow_id = %state.workflow_id, source = %source_path, "Fetch skipped");
                PathBuf::from(&source_path)
            }
        };
        self.leave(state, PipelineStep::Fetch).await;

        // Cut
        self.enter(state, PipelineStep::Cut, cancel).await?;
        let cut = if options.skip_cut {
            info!(workflow_id = %state.workflow_id, "Cut skipped");
            ProcessResult::passthrough(vec![fetched])
        } else {
            let result = processor.cut(&fetched, cancel).await?;
            for path in &result.output_paths {
                state.record_file(path);
            }
            state.record_metric("rows_after_cut", result.rows_processed);
            result
        };
        self.leave(state, PipelineStep::Cut).await;

        // Split
        self.enter(state, PipelineStep::Split, cancel).await?;
        let partitions = if options.skip_split {
            info!(workflow_id = %state.workflow_id, "Split skipped");
            processor.partition_inputs(&cut.output_paths)?
        } else {
            let input = cut
                .output_path()
                .cloned()
                .ok_or_else(|| ConfigError::Invalid("Cut produced no output file".to_string()))?;
            let result = processor.split(&input, cancel).await?;
            for path in &result.output_paths {
                state.record_file(path);
            }
            state.record_metric("split_files_count", result.output_paths.len() as u64);
            result.output_paths
        };
        self.leave(state, PipelineStep::Split).await;

        // Load
        self.enter(state, PipelineStep::Load, cancel).await?;
        if options.skip_load {
            info!(workflow_id = %state.workflow_id, "Load skipped");
        } else {
            let loader = GraphLoader::new(
                Arc::clone(&self.graph),
                &self.settings.graph,
                LoadOptions {
                    delimiter,
                    ..LoadOptions::from(&self.settings.load)
                },
            );
            let result = loader.load_files(&partitions, cancel).await?;
            record_load_metrics(state, &result);
        }
        self.leave(state, PipelineStep::Load).await;

        Ok(())
    }

    /// Write the new phase to the store before its work begins
    async fn enter(
        &self,
        state: &mut WorkflowState,
        step: PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let transition = state.begin_step(step)?;
        self.store.put(state).await;
        self.event_bus.emit_lossy(ImportEvent::StepChanged {
            workflow_id: state.workflow_id,
            old_status: transition.old_status.to_string(),
            new_status: transition.new_status.to_string(),
            timestamp: transition.transitioned_at,
        });
        info!(workflow_id = %state.workflow_id, step = step.as_str(), "Phase started");
        Ok(())
    }

    async fn leave(&self, state: &mut WorkflowState, step: PipelineStep) {
        state.complete_step(step);
        self.store.put(state).await;
    }

    /// Landing path for a fetched file inside the dropbox directory
    fn destination(&self, source_path: &str, request: &ImportRequest) -> PathBuf {
        let name = Path::new(source_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}_{}.csv", request.domain_name, request.cob_date_compact()));
        self.settings.dropbox_dir.join(name)
    }
}

/// Per-file failures are surfaced here, never as a run failure
fn record_load_metrics(state: &mut WorkflowState, result: &LoadResult) {
    state.record_metric("files_loaded", result.files_loaded as u64);
    state.record_metric("nodes_created", result.nodes_created);
    state.record_metric("summary_nodes_created", result.summary_nodes_created);
    state.record_metric("relationships_created", result.relationships_created);
    state.record_metric("rows_skipped", result.rows_skipped);

    if !result.failed_files.is_empty() {
        warn!(
            workflow_id = %state.workflow_id,
            failed = result.failed_files.len(),
            "Load finished with failed files"
        );
        let failed: Vec<String> = result
            .failed_files
            .iter()
            .map(|f| f.path.display().to_string())
            .collect();
        state.record_metric("load_failed_files", failed);
    }
    if let Some(error) = &result.error {
        state.record_metric("load_error", error.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailedFile;

    #[test]
    fn test_cancellation_maps_from_every_phase() {
        assert!(matches!(
            PipelineError::from(ProcessingError::Cancelled),
            PipelineError::Cancelled
        ));
        assert!(matches!(
            PipelineError::from(LoadError::Cancelled),
            PipelineError::Cancelled
        ));
        assert!(matches!(
            PipelineError::from(LoadError::Connection("refused".into())),
            PipelineError::Load(_)
        ));
    }

    #[test]
    fn test_failed_files_become_metrics() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        let result = LoadResult {
            success: false,
            files_loaded: 2,
            nodes_created: 5,
            failed_files: vec![FailedFile {
                path: PathBuf::from("/tmp/split-G3.csv"),
                error: "Parse error".into(),
            }],
            error: Some("1 of 3 files failed to load".into()),
            ..LoadResult::default()
        };
        record_load_metrics(&mut state, &result);

        assert_eq!(state.metric_u64("nodes_created"), Some(5));
        assert_eq!(state.metric_u64("files_loaded"), Some(2));
        assert_eq!(
            state.metrics["load_failed_files"],
            serde_json::json!(["/tmp/split-G3.csv"])
        );
    }

    #[test]
    fn test_run_options_default_runs_everything() {
        let options: RunOptions = serde_json::from_str("{\"skip_load\": true}").unwrap();
        assert!(!options.skip_fetch);
        assert!(options.skip_load);
    }
}
