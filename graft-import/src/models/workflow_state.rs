//! Import workflow state machine
//!
//! A run progresses through a fixed linear sequence:
//! PENDING → FETCHING → CUTTING → SPLITTING → LOADING → COMPLETED
//!
//! FAILED and CANCELLED are reachable from any non-terminal state. A skipped
//! phase is still entered (and immediately left), so the sequence never has gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Pending,
    Fetching,
    Cutting,
    Splitting,
    Loading,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Position in the linear phase sequence; `None` for FAILED/CANCELLED
    fn rank(self) -> Option<u8> {
        match self {
            WorkflowStatus::Pending => Some(0),
            WorkflowStatus::Fetching => Some(1),
            WorkflowStatus::Cutting => Some(2),
            WorkflowStatus::Splitting => Some(3),
            WorkflowStatus::Loading => Some(4),
            WorkflowStatus::Completed => Some(5),
            WorkflowStatus::Failed | WorkflowStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Fetching => "FETCHING",
            WorkflowStatus::Cutting => "CUTTING",
            WorkflowStatus::Splitting => "SPLITTING",
            WorkflowStatus::Loading => "LOADING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline phase, as recorded in `current_step` / `steps_completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Initializing,
    Fetch,
    Cut,
    Split,
    Load,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Initializing => "initializing",
            PipelineStep::Fetch => "fetch",
            PipelineStep::Cut => "cut",
            PipelineStep::Split => "split",
            PipelineStep::Load => "load",
        }
    }

    /// Status the workflow is in while this step runs
    pub fn status(self) -> WorkflowStatus {
        match self {
            PipelineStep::Initializing => WorkflowStatus::Pending,
            PipelineStep::Fetch => WorkflowStatus::Fetching,
            PipelineStep::Cut => WorkflowStatus::Cutting,
            PipelineStep::Split => WorkflowStatus::Splitting,
            PipelineStep::Load => WorkflowStatus::Loading,
        }
    }
}

/// Rejected state mutation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid workflow transition {from} -> {to}")]
pub struct TransitionError {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub workflow_id: Uuid,
    pub old_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Progress of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub current_step: Option<PipelineStep>,
    pub steps_completed: Vec<PipelineStep>,
    /// Every artifact path produced across phases, in creation order
    pub files_created: Vec<PathBuf>,
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Create a PENDING state for a new run
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            workflow_id,
            status: WorkflowStatus::Pending,
            current_step: Some(PipelineStep::Initializing),
            steps_completed: Vec::new(),
            files_created: Vec::new(),
            metrics: BTreeMap::new(),
            message: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to a new status
    ///
    /// Non-monotonic transitions and any transition out of a terminal status
    /// are rejected, leaving the state untouched.
    pub fn transition_to(
        &mut self,
        new_status: WorkflowStatus,
    ) -> Result<StateTransition, TransitionError> {
        if !self.status.can_transition_to(new_status) {
            return Err(TransitionError {
                from: self.status,
                to: new_status,
            });
        }

        let transition = StateTransition {
            workflow_id: self.workflow_id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;

        if new_status.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
            if new_status == WorkflowStatus::Completed {
                self.current_step = None;
            }
        }

        Ok(transition)
    }

    /// Enter a pipeline phase: status and `current_step` change together
    pub fn begin_step(&mut self, step: PipelineStep) -> Result<StateTransition, TransitionError> {
        let transition = self.transition_to(step.status())?;
        self.current_step = Some(step);
        Ok(transition)
    }

    pub fn complete_step(&mut self, step: PipelineStep) {
        self.steps_completed.push(step);
    }

    pub fn record_file(&mut self, path: impl Into<PathBuf>) {
        self.files_created.push(path.into());
    }

    pub fn record_metric(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metrics.insert(key.to_string(), value.into());
    }

    /// Metric as an unsigned count, if present
    pub fn metric_u64(&self, key: &str) -> Option<u64> {
        self.metrics.get(key).and_then(|v| v.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_sequence() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        for step in [
            PipelineStep::Fetch,
            PipelineStep::Cut,
            PipelineStep::Split,
            PipelineStep::Load,
        ] {
            state.begin_step(step).unwrap();
            assert_eq!(state.current_step, Some(step));
            state.complete_step(step);
        }

        let transition = state.transition_to(WorkflowStatus::Completed).unwrap();
        assert_eq!(transition.old_status, WorkflowStatus::Loading);
        assert!(state.is_terminal());
        assert!(state.ended_at.is_some());
        assert_eq!(state.current_step, None);
        assert_eq!(state.steps_completed.len(), 4);
    }

    #[test]
    fn test_phase_cannot_be_skipped_or_repeated() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        assert!(state.transition_to(WorkflowStatus::Cutting).is_err());

        state.begin_step(PipelineStep::Fetch).unwrap();
        let err = state.begin_step(PipelineStep::Fetch).unwrap_err();
        assert_eq!(err.from, WorkflowStatus::Fetching);
        assert_eq!(state.status, WorkflowStatus::Fetching);
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Fetching,
            WorkflowStatus::Cutting,
            WorkflowStatus::Splitting,
            WorkflowStatus::Loading,
        ] {
            assert!(status.can_transition_to(WorkflowStatus::Failed));
            assert!(status.can_transition_to(WorkflowStatus::Cancelled));
        }
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let mut state = WorkflowState::new(Uuid::new_v4());
        state.transition_to(WorkflowStatus::Failed).unwrap();
        // Failed step stays visible for diagnostics
        assert_eq!(state.current_step, Some(PipelineStep::Initializing));

        assert!(state.transition_to(WorkflowStatus::Fetching).is_err());
        assert!(state.transition_to(WorkflowStatus::Failed).is_err());
        assert!(state.transition_to(WorkflowStatus::Cancelled).is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&WorkflowStatus::Splitting).unwrap();
        assert_eq!(json, "\"SPLITTING\"");
        let json = serde_json::to_string(&PipelineStep::Load).unwrap();
        assert_eq!(json, "\"load\"");
    }
}
