//! File processors: column cutting and partition splitting
//!
//! Both run on blocking threads; [`DataProcessor`] resolves output locations
//! for a domain and COB date and hands the work to `spawn_blocking`.

pub mod cutter;
pub mod splitter;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use walkdir::WalkDir;

use crate::config::ConfigError;
use crate::models::{ColumnConfig, ProcessResult};

pub use cutter::{ColumnCutter, CutStats};
pub use splitter::{sanitize_key, FileSplitter, SplitOutcome, UNKNOWN_PARTITION};

/// Cut/split failure; short rows are padded and never reach this type
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Input file cannot be opened
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Processing cancelled")]
    Cancelled,

    /// Blocking worker panicked or was aborted
    #[error("Processing task failed: {0}")]
    Task(String),
}

/// Cut and split for one domain and COB date
#[derive(Debug, Clone)]
pub struct DataProcessor {
    columns: ColumnConfig,
    dropbox_dir: PathBuf,
    cob_date: String,
}

impl DataProcessor {
    pub fn new(columns: ColumnConfig, dropbox_dir: impl Into<PathBuf>, cob_date: impl Into<String>) -> Self {
        Self {
            columns,
            dropbox_dir: dropbox_dir.into(),
            cob_date: cob_date.into(),
        }
    }

    fn expand(&self, template: &str) -> String {
        template
            .replace("{dropbox_dir}", &self.dropbox_dir.to_string_lossy())
            .replace("{cob_date}", &self.cob_date)
    }

    pub fn processed_path(&self) -> PathBuf {
        PathBuf::from(self.expand(&self.columns.processed_output_dir))
            .join(self.expand(&self.columns.processed_output_file))
    }

    pub fn split_dir(&self) -> PathBuf {
        PathBuf::from(self.expand(&self.columns.split_output_dir))
    }

    pub fn split_prefix(&self) -> String {
        self.expand(&self.columns.split_output_prefix)
    }

    /// Project `input` into the processed file
    pub async fn cut(&self, input: &Path, cancel: &CancellationToken) -> Result<ProcessResult, ProcessingError> {
        let output = self.processed_path();
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let columns = self.columns.clone();
        let input_path = input.to_path_buf();
        let output_path = output.clone();
        let cancel = cancel.clone();
        let stats = tokio::task::spawn_blocking(move || {
            ColumnCutter::new(&columns).cut_file(&input_path, &output_path, &cancel)
        })
        .await
        .map_err(|e| ProcessingError::Task(e.to_string()))??;

        info!(
            input = %input.display(),
            output = %output.display(),
            rows = stats.rows,
            "Columns cut"
        );
        Ok(ProcessResult::new(vec![output], stats.rows))
    }

    /// Partition `input` into the split directory
    pub async fn split(&self, input: &Path, cancel: &CancellationToken) -> Result<ProcessResult, ProcessingError> {
        let columns = self.columns.clone();
        let input_path = input.to_path_buf();
        let dir = self.split_dir();
        let prefix = self.split_prefix();
        let cancel = cancel.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            FileSplitter::new(&columns).split_file(&input_path, &dir, &prefix, &cancel)
        })
        .await
        .map_err(|e| ProcessingError::Task(e.to_string()))??;

        info!(
            input = %input.display(),
            files = outcome.output_paths.len(),
            rows = outcome.rows,
            "File split"
        );
        Ok(ProcessResult::new(outcome.output_paths, outcome.rows))
    }

    /// Loader inputs for a skipped split: a directory expands to its partition files
    pub fn partition_inputs(&self, passthrough: &[PathBuf]) -> Result<Vec<PathBuf>, ProcessingError> {
        let mut inputs = Vec::new();
        for path in passthrough {
            if path.is_dir() {
                inputs.extend(discover_partitions(path, &self.split_prefix())?);
            } else {
                inputs.push(path.clone());
            }
        }
        Ok(inputs)
    }
}

/// Every `<prefix>*.csv` file directly inside `dir`, sorted
pub fn discover_partitions(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, ProcessingError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ProcessingError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".csv") {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_locations_expand_templates() {
        let processor = DataProcessor::new(ColumnConfig::default(), "/mnt/nas", "20250102");
        assert_eq!(
            processor.processed_path(),
            PathBuf::from("/mnt/nas/20250102/processed_20250102.dat")
        );
        assert_eq!(processor.split_dir(), PathBuf::from("/mnt/nas/20250102/split"));
        assert_eq!(processor.split_prefix(), "split_20250102-");
    }

    #[test]
    fn test_discover_partitions_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["p-B.csv", "p-A.csv", "other.csv", "p-C.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("p-nested.csv")).unwrap();

        let files = discover_partitions(dir.path(), "p-").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["p-A.csv", "p-B.csv"]);
    }

    #[tokio::test]
    async fn test_cut_then_split() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("raw.dat");
        std::fs::write(&src, "T1\u{1}G1\u{1}5.0\nT2\u{1}G2\u{1}1.5\nT3\u{1}G1\u{1}\n").unwrap();

        let columns = ColumnConfig {
            column_indices: vec![1, 2, 3],
            column_names: vec!["transaction_id".into(), "gfcid".into(), "mtm_usd_amount".into()],
            ..ColumnConfig::default()
        };
        let processor = DataProcessor::new(columns, dir.path(), "20250102");
        let cancel = CancellationToken::new();

        let cut = processor.cut(&src, &cancel).await.unwrap();
        assert_eq!(cut.rows_processed, 3);

        let split = processor
            .split(cut.output_path().unwrap(), &cancel)
            .await
            .unwrap();
        assert_eq!(split.rows_processed, 3);
        assert_eq!(split.output_paths.len(), 2);
        assert_eq!(
            processor.partition_inputs(&[processor.split_dir()]).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_delimiter_and_quotes_in_fields_keep_rows_in_their_partition() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("raw.dat");
        std::fs::write(&src, "T1\u{1}ACME, INC\u{1}G1\nT2\u{1}\"BETA\u{1}G1\nT3\u{1}GAMMA\u{1}G1\n").unwrap();

        let columns = ColumnConfig {
            column_indices: vec![1, 2, 3],
            column_names: vec!["transaction_id".into(), "obligor_name".into(), "gfcid".into()],
            ..ColumnConfig::default()
        };
        let processor = DataProcessor::new(columns, dir.path(), "20250102");
        let cancel = CancellationToken::new();

        let cut = processor.cut(&src, &cancel).await.unwrap();
        let split = processor
            .split(cut.output_path().unwrap(), &cancel)
            .await
            .unwrap();

        assert_eq!(split.rows_processed, 3);
        assert_eq!(
            split.output_paths,
            vec![processor.split_dir().join("split_20250102-G1.csv")]
        );

        let mut reader = csv::Reader::from_path(&split.output_paths[0]).unwrap();
        let names: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[1].to_string())
            .collect();
        assert_eq!(names, vec!["ACME, INC", "\"BETA", "GAMMA"]);
    }
}
