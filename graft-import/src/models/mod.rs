//! Data models for graft-import
//!
//! - Import request and workflow state machine
//! - Per-domain source/column configuration
//! - Phase result value objects

pub mod domain_config;
pub mod import_request;
pub mod results;
pub mod workflow_state;

pub use domain_config::{ColumnConfig, ConnectorKind, PartitionKey, SourceConfig};
pub use import_request::ImportRequest;
pub use results::{FailedFile, FetchResult, LoadResult, ProcessResult};
pub use workflow_state::{
    PipelineStep, StateTransition, TransitionError, WorkflowState, WorkflowStatus,
};
