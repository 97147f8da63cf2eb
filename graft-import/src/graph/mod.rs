//! Graph storage seam
//!
//! The loader talks to a [`GraphBackend`], which hands out one
//! [`GraphSession`] per worker. Sessions are never shared between workers.
//! Two backends exist: [`Neo4jBackend`] over Bolt and [`MemoryGraph`], which
//! applies the same merge semantics in process.

pub mod cypher;
pub mod loader;
pub mod memory;
pub mod neo4j;

use graft_common::config::{GraphSchema, PostLoadPass};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use thiserror::Error;

pub use loader::{GraphLoader, LoadError, LoadOptions};
pub use memory::MemoryGraph;
pub use neo4j::Neo4jBackend;

/// Graph driver failure
#[derive(Debug, Error)]
pub enum GraphError {
    /// No usable session: unreachable server, rejected credentials
    #[error("Graph connection failed: {0}")]
    Connection(String),

    /// A statement failed on an established session
    #[error("Graph query failed: {0}")]
    Query(String),

    /// Invalid labels, keys or relationship types
    #[error("Graph schema error: {0}")]
    Schema(String),
}

impl GraphError {
    /// Connection-level failures abort a whole load phase
    pub fn is_connection(&self) -> bool {
        matches!(self, GraphError::Connection(_))
    }
}

/// Typed detail property
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Float(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// One detail row ready for merging
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRecord {
    /// Natural unique id of the detail node
    pub id: String,
    /// Key of the summary node this row links to
    pub summary_key: String,
    /// Every column of the row, typed
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Counters returned by every write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounters {
    pub nodes_created: u64,
    pub relationships_created: u64,
    /// Rows that found their summary node
    pub rows_matched: u64,
    /// Rows dropped because no summary node matched
    pub rows_skipped: u64,
}

impl AddAssign for WriteCounters {
    fn add_assign(&mut self, other: Self) {
        self.nodes_created += other.nodes_created;
        self.relationships_created += other.relationships_created;
        self.rows_matched += other.rows_matched;
        self.rows_skipped += other.rows_skipped;
    }
}

/// Source of graph sessions
#[async_trait::async_trait]
pub trait GraphBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Open an isolated session; failure here is connection-level
    async fn open_session(&self) -> Result<Box<dyn GraphSession>, GraphError>;
}

/// Typed, idempotent graph writes
///
/// Every operation must be safe to repeat: re-running any of them with the
/// same input leaves the graph unchanged and reports zero creations.
#[async_trait::async_trait]
pub trait GraphSession: Send {
    /// Create-if-absent uniqueness constraints and indexes
    async fn ensure_schema(&mut self, schema: &GraphSchema) -> Result<(), GraphError>;

    /// Upsert one summary node per key
    async fn merge_summary_nodes(
        &mut self,
        schema: &GraphSchema,
        keys: &[String],
    ) -> Result<WriteCounters, GraphError>;

    /// Merge detail nodes and their edges in one transactional unit
    ///
    /// A row whose summary node does not exist is skipped, not failed.
    /// Properties are set only when the detail node is first created.
    async fn merge_detail_batch(
        &mut self,
        schema: &GraphSchema,
        rows: &[DetailRecord],
    ) -> Result<WriteCounters, GraphError>;

    /// Run one post-load pass over the whole graph
    async fn run_post_load(
        &mut self,
        schema: &GraphSchema,
        pass: &PostLoadPass,
    ) -> Result<WriteCounters, GraphError>;
}
