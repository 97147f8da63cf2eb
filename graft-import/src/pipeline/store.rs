//! Concurrency-safe workflow state store
//!
//! One owning run writes a workflow's state; any number of status readers
//! poll it. Writers replace the whole state under the write lock and readers
//! get clones, so a partially written state is never observable.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::WorkflowState;

/// Cloneable handle; clones share the same maps
#[derive(Debug, Clone, Default)]
pub struct WorkflowStore {
    states: Arc<RwLock<HashMap<Uuid, WorkflowState>>>,
    /// Cancellation tokens of runs still in flight
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow's state
    pub async fn put(&self, state: &WorkflowState) {
        self.states
            .write()
            .await
            .insert(state.workflow_id, state.clone());
    }

    pub async fn get(&self, workflow_id: Uuid) -> Option<WorkflowState> {
        self.states.read().await.get(&workflow_id).cloned()
    }

    /// Every known workflow, oldest first
    pub async fn list(&self) -> Vec<WorkflowState> {
        let mut states: Vec<WorkflowState> = self.states.read().await.values().cloned().collect();
        states.sort_by_key(|s| s.started_at);
        states
    }

    pub async fn register_token(&self, workflow_id: Uuid, token: CancellationToken) {
        self.tokens.write().await.insert(workflow_id, token);
    }

    pub async fn remove_token(&self, workflow_id: Uuid) {
        self.tokens.write().await.remove(&workflow_id);
    }

    /// Signal cancellation; false when the run is unknown or already finished
    pub async fn cancel(&self, workflow_id: Uuid) -> bool {
        match self.tokens.read().await.get(&workflow_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
