//! Idempotent bulk loader for partition files
//!
//! Per run: schema objects are ensured once, then partition files are loaded
//! by a bounded worker pool, each worker on its own session. Per file:
//!
//! 1. Scan the whole file once, validating every row and collecting the
//!    distinct summary keys.
//! 2. Merge one summary node per key. Detail rows match their summary node
//!    by key and are dropped when it is absent, so this must come first.
//! 3. Stream detail rows in batches of `batch_size`, each batch one
//!    transactional unit, merging detail nodes and their edges.
//!
//! A file that fails to parse or write is recorded in `failed_files` and the
//! rest of the batch continues. Losing the connection aborts the phase.
//! Post-load passes run only when every file loaded.

use csv::{ReaderBuilder, StringRecord};
use futures::stream::{self, StreamExt};
use graft_common::config::{GraphSchema, GraphSettings, LoadSettings, PostLoadPass};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DetailRecord, GraphBackend, GraphError, GraphSession, PropertyValue, WriteCounters};
use crate::models::{FailedFile, LoadResult};

/// Fatal load-phase failure
#[derive(Debug, Error)]
pub enum LoadError {
    /// No session could be established, or it was lost mid-load
    #[error("Graph connection failed: {0}")]
    Connection(String),

    #[error("Load cancelled")]
    Cancelled,

    /// Schema setup or another whole-phase graph failure
    #[error(transparent)]
    Graph(GraphError),
}

impl From<GraphError> for LoadError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Connection(msg) => LoadError::Connection(msg),
            other => LoadError::Graph(other),
        }
    }
}

/// Failure confined to one file
#[derive(Debug, Error)]
enum FileError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Graph(GraphError),

    #[error("cancelled")]
    Cancelled,
}

impl From<csv::Error> for FileError {
    fn from(err: csv::Error) -> Self {
        FileError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Rows per transactional unit
    pub batch_size: usize,
    /// Files loaded concurrently
    pub workers: usize,
    /// Partition file field delimiter
    pub delimiter: u8,
    /// Merge summary nodes before detail rows; only disabled to observe drops
    pub summary_prepass: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 4,
            delimiter: b',',
            summary_prepass: true,
        }
    }
}

impl From<&LoadSettings> for LoadOptions {
    fn from(settings: &LoadSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            workers: settings.workers.max(1),
            ..Self::default()
        }
    }
}

/// Counts for one loaded file
#[derive(Debug, Clone, Copy, Default)]
struct FileCounters {
    summary_nodes_created: u64,
    writes: WriteCounters,
    /// Rows with an empty detail id
    blank_ids: u64,
}

enum FileOutcome {
    Loaded(FileCounters),
    Failed(String),
    Cancelled,
    Fatal(String),
}

/// Result of the pre-pass scan
struct FileScan {
    header: StringRecord,
    detail_idx: usize,
    summary_idx: usize,
    keys: BTreeSet<String>,
    rows: u64,
}

pub struct GraphLoader {
    backend: Arc<dyn GraphBackend>,
    schema: GraphSchema,
    post_load: Vec<PostLoadPass>,
    options: LoadOptions,
}

impl GraphLoader {
    pub fn new(backend: Arc<dyn GraphBackend>, settings: &GraphSettings, options: LoadOptions) -> Self {
        Self {
            backend,
            schema: settings.schema.clone(),
            post_load: settings.post_load.clone(),
            options,
        }
    }

    /// Ensure constraints and indexes; safe on every run
    pub async fn ensure_schema(&self) -> Result<(), LoadError> {
        let mut session = self.backend.open_session().await?;
        session.ensure_schema(&self.schema).await?;
        debug!(backend = self.backend.name(), "Graph schema ensured");
        Ok(())
    }

    /// Load a batch of partition files
    pub async fn load_files(&self, files: &[PathBuf], cancel: &CancellationToken) -> Result<LoadResult, LoadError> {
        self.ensure_schema().await?;
        if files.is_empty() {
            info!("No partition files to load");
            return Ok(LoadResult::empty());
        }

        // Cancelled on a fatal failure so the other workers stop at their next batch
        let workers_token = cancel.child_token();
        let workers = self.options.workers.max(1);
        info!(files = files.len(), workers, "Loading partition files");

        let mut outcomes: Vec<(usize, PathBuf, FileOutcome)> = stream::iter(files.iter().cloned().enumerate())
            .map(|(i, path)| {
                let token = workers_token.clone();
                async move {
                    let outcome = self.load_one(&path, &token).await;
                    (i, path, outcome)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _, _)| *i);

        let mut result = LoadResult::empty();
        let mut fatal: Option<String> = None;
        let mut cancelled = false;

        for (_, path, outcome) in outcomes {
            match outcome {
                FileOutcome::Loaded(counters) => {
                    result.files_loaded += 1;
                    result.summary_nodes_created += counters.summary_nodes_created;
                    result.nodes_created += counters.writes.nodes_created + counters.summary_nodes_created;
                    result.relationships_created += counters.writes.relationships_created;
                    result.rows_skipped += counters.writes.rows_skipped + counters.blank_ids;
                }
                FileOutcome::Failed(message) => result.failed_files.push(FailedFile {
                    path,
                    error: message,
                }),
                FileOutcome::Cancelled => cancelled = true,
                FileOutcome::Fatal(message) => {
                    fatal.get_or_insert(message);
                }
            }
        }

        if let Some(message) = fatal {
            error!(error = %message, "Load aborted on connection failure");
            return Err(LoadError::Connection(message));
        }
        if cancelled || cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        result.success = result.failed_files.is_empty();
        if result.success {
            match self.run_post_load(&mut result).await {
                Ok(()) => {}
                Err(GraphError::Connection(msg)) => return Err(LoadError::Connection(msg)),
                Err(e) => {
                    warn!(error = %e, "Post-load pass failed");
                    result.error = Some(e.to_string());
                }
            }
        } else {
            let message = format!("{} of {} files failed to load", result.failed_files.len(), files.len());
            warn!(failed = result.failed_files.len(), "{}", message);
            result.error = Some(message);
        }

        info!(
            files_loaded = result.files_loaded,
            nodes_created = result.nodes_created,
            relationships_created = result.relationships_created,
            rows_skipped = result.rows_skipped,
            "Load complete"
        );
        Ok(result)
    }

    async fn run_post_load(&self, result: &mut LoadResult) -> Result<(), GraphError> {
        if self.post_load.is_empty() {
            return Ok(());
        }
        let mut session = self.backend.open_session().await?;
        for pass in &self.post_load {
            let counters = session.run_post_load(&self.schema, pass).await?;
            debug!(pass = ?pass, relationships_created = counters.relationships_created, "Post-load pass complete");
            result.relationships_created += counters.relationships_created;
            result.nodes_created += counters.nodes_created;
        }
        Ok(())
    }

    async fn load_one(&self, path: &Path, cancel: &CancellationToken) -> FileOutcome {
        if cancel.is_cancelled() {
            return FileOutcome::Cancelled;
        }

        let mut session = match self.backend.open_session().await {
            Ok(session) => session,
            Err(e) => return self.fatal(e, cancel),
        };

        match self.load_file(session.as_mut(), path, cancel).await {
            Ok(counters) => {
                debug!(
                    file = %path.display(),
                    nodes_created = counters.writes.nodes_created,
                    rows_skipped = counters.writes.rows_skipped,
                    "File loaded"
                );
                FileOutcome::Loaded(counters)
            }
            Err(FileError::Cancelled) => FileOutcome::Cancelled,
            Err(FileError::Graph(e)) if e.is_connection() => self.fatal(e, cancel),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "File failed to load");
                FileOutcome::Failed(e.to_string())
            }
        }
    }

    fn fatal(&self, err: GraphError, cancel: &CancellationToken) -> FileOutcome {
        cancel.cancel();
        FileOutcome::Fatal(err.to_string())
    }

    async fn load_file(
        &self,
        session: &mut dyn GraphSession,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileCounters, FileError> {
        let mut counters = FileCounters::default();

        // Step 1: validate and collect keys
        let scan = {
            let path = path.to_path_buf();
            let schema = self.schema.clone();
            let delimiter = self.options.delimiter;
            tokio::task::spawn_blocking(move || scan_file(&path, &schema, delimiter))
                .await
                .map_err(|e| FileError::Parse(format!("scan task failed: {}", e)))??
        };
        debug!(file = %path.display(), rows = scan.rows, keys = scan.keys.len(), "Pre-pass scan complete");

        // Step 2: summary nodes before any detail row
        if self.options.summary_prepass {
            let keys: Vec<String> = scan.keys.iter().cloned().collect();
            for chunk in keys.chunks(self.options.batch_size.max(1)) {
                let created = session
                    .merge_summary_nodes(&self.schema, chunk)
                    .await
                    .map_err(FileError::Graph)?;
                counters.summary_nodes_created += created.nodes_created;
            }
        }

        // Step 3: detail rows in bounded batches
        let (tx, mut rx) = mpsc::channel::<Vec<DetailRecord>>(2);
        let producer = {
            let path = path.to_path_buf();
            let measures: HashSet<String> = self.schema.measure_fields.iter().cloned().collect();
            let delimiter = self.options.delimiter;
            let batch_size = self.options.batch_size.max(1);
            let layout = (scan.header, scan.detail_idx, scan.summary_idx);
            tokio::task::spawn_blocking(move || {
                read_batches(&path, delimiter, batch_size, &layout, &measures, &tx)
            })
        };

        let mut write_error = None;
        while let Some(batch) = rx.recv().await {
            if cancel.is_cancelled() {
                write_error = Some(FileError::Cancelled);
                break;
            }
            match session.merge_detail_batch(&self.schema, &batch).await {
                Ok(written) => counters.writes += written,
                Err(e) => {
                    write_error = Some(FileError::Graph(e));
                    break;
                }
            }
        }
        // Stops the producer at its next send
        drop(rx);

        let blank_ids = producer
            .await
            .map_err(|e| FileError::Parse(format!("reader task failed: {}", e)))?;
        if let Some(e) = write_error {
            return Err(e);
        }
        counters.blank_ids = blank_ids?;
        if counters.blank_ids > 0 {
            warn!(file = %path.display(), rows = counters.blank_ids, "Rows without a detail id were skipped");
        }
        Ok(counters)
    }
}

fn open_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<File>, FileError> {
    let file = File::open(path).map_err(|e| FileError::Parse(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(file))
}

fn column_index(header: &StringRecord, name: &str) -> Result<usize, FileError> {
    header
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| FileError::Parse(format!("header is missing required column '{}'", name)))
}

/// Validate every row and collect distinct non-empty summary keys
fn scan_file(path: &Path, schema: &GraphSchema, delimiter: u8) -> Result<FileScan, FileError> {
    let mut reader = open_reader(path, delimiter)?;
    let header = reader.headers()?.clone();
    let detail_idx = column_index(&header, &schema.detail_key)?;
    let summary_idx = column_index(&header, &schema.summary_key)?;

    let mut keys = BTreeSet::new();
    let mut rows = 0;
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        rows += 1;
        if let Some(key) = record.get(summary_idx).map(str::trim).filter(|k| !k.is_empty()) {
            if !keys.contains(key) {
                keys.insert(key.to_string());
            }
        }
    }

    Ok(FileScan {
        header,
        detail_idx,
        summary_idx,
        keys,
        rows,
    })
}

/// Stream typed detail batches into `tx`; returns rows skipped for a blank id
fn read_batches(
    path: &Path,
    delimiter: u8,
    batch_size: usize,
    layout: &(StringRecord, usize, usize),
    measures: &HashSet<String>,
    tx: &mpsc::Sender<Vec<DetailRecord>>,
) -> Result<u64, FileError> {
    let (header, detail_idx, summary_idx) = layout;
    let mut reader = open_reader(path, delimiter)?;
    let mut blank_ids = 0;
    let mut batch = Vec::with_capacity(batch_size);

    for record in reader.records() {
        let record = record?;
        match to_detail(&record, header, *detail_idx, *summary_idx, measures) {
            Some(detail) => batch.push(detail),
            None => blank_ids += 1,
        }
        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(full).is_err() {
                return Ok(blank_ids);
            }
        }
    }
    if !batch.is_empty() {
        // Receiver gone means the consumer already stopped
        let _ = tx.blocking_send(batch);
    }
    Ok(blank_ids)
}

/// Typed detail row, or `None` when the detail id is empty
fn to_detail(
    record: &StringRecord,
    header: &StringRecord,
    detail_idx: usize,
    summary_idx: usize,
    measures: &HashSet<String>,
) -> Option<DetailRecord> {
    let id = record.get(detail_idx).map(str::trim).unwrap_or("");
    if id.is_empty() {
        return None;
    }
    let summary_key = record.get(summary_idx).map(str::trim).unwrap_or("").to_string();

    let properties: BTreeMap<String, PropertyValue> = header
        .iter()
        .zip(record.iter())
        .map(|(name, raw)| {
            let name = name.trim();
            let raw = raw.trim();
            let value = if raw.is_empty() {
                PropertyValue::Null
            } else if measures.contains(name) {
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(PropertyValue::Float)
                    .unwrap_or(PropertyValue::Null)
            } else {
                PropertyValue::Text(raw.to_string())
            };
            (name.to_string(), value)
        })
        .collect();

    Some(DetailRecord {
        id: id.to_string(),
        summary_key,
        properties,
    })
}
