//! Phase result value objects

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Successful fetch: the file now sits at `local_path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub local_path: PathBuf,
    pub bytes_transferred: u64,
}

/// Successful cut or split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// One path for a cut, one per partition for a split
    pub output_paths: Vec<PathBuf>,
    pub rows_processed: u64,
    /// The phase was skipped and `output_paths` is the prior phase's output
    pub skipped: bool,
}

impl ProcessResult {
    pub fn new(output_paths: Vec<PathBuf>, rows_processed: u64) -> Self {
        Self {
            output_paths,
            rows_processed,
            skipped: false,
        }
    }

    /// No-op result carrying the prior output unchanged
    pub fn passthrough(output_paths: Vec<PathBuf>) -> Self {
        Self {
            output_paths,
            rows_processed: 0,
            skipped: true,
        }
    }

    /// The single output of a cut
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output_paths.first()
    }
}

/// A file that failed to load without aborting the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

/// Aggregate outcome of loading a batch of partition files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    /// False iff at least one file failed
    pub success: bool,
    pub files_loaded: usize,
    /// Summary and detail nodes created
    pub nodes_created: u64,
    pub summary_nodes_created: u64,
    pub relationships_created: u64,
    /// Rows not represented in the graph (blank id, or no summary node at match time)
    pub rows_skipped: u64,
    pub failed_files: Vec<FailedFile>,
    pub error: Option<String>,
}

impl LoadResult {
    /// Result for an empty batch
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed_paths(&self) -> Vec<PathBuf> {
        self.failed_files.iter().map(|f| f.path.clone()).collect()
    }
}
