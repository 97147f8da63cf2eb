//! graft-import library interface
//!
//! Exposes the pipeline and its phases for the binary and integration tests.

pub mod api;
pub mod config;
pub mod connectors;
pub mod error;
pub mod graph;
pub mod models;
pub mod pipeline;
pub mod processors;

pub use crate::error::{ApiError, ApiResult};
pub use crate::pipeline::{ImportPipeline, PipelineError, RunOptions, WorkflowStore};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ImportPipeline>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    pub graph_backend: &'static str,
}

impl AppState {
    pub fn new(pipeline: Arc<ImportPipeline>, graph_backend: &'static str) -> Self {
        Self {
            pipeline,
            startup_time: Utc::now(),
            graph_backend,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::import_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
