//! Partition splitter
//!
//! Reads a delimited file and writes every row to `<prefix><key>.csv` for its
//! partition key. Rows are buffered up to `chunk_size` and flushed grouped by
//! key, so peak memory is bounded by the chunk rather than the file.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProcessingError;
use crate::models::{ColumnConfig, PartitionKey};

/// Partition used for rows with a missing or empty key
pub const UNKNOWN_PARTITION: &str = "unknown";

/// Replace path separators so a key is always a plain file name
pub fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// One file per distinct sanitized key, in first-seen order
    pub output_paths: Vec<PathBuf>,
    pub rows: u64,
}

pub struct FileSplitter<'a> {
    config: &'a ColumnConfig,
}

/// Where the key lives in a record
#[derive(Clone, Copy)]
enum KeyColumn {
    Position(usize),
    /// Named column absent from the header
    Missing,
}

impl<'a> FileSplitter<'a> {
    pub fn new(config: &'a ColumnConfig) -> Self {
        Self { config }
    }

    /// Split `input` into `output_dir`, blocking; run on a blocking thread
    pub fn split_file(
        &self,
        input: &Path,
        output_dir: &Path,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<SplitOutcome, ProcessingError> {
        let delimiter = self.config.output_delimiter_byte()?;
        let source = File::open(input).map_err(|e| ProcessingError::Open {
            path: input.to_path_buf(),
            source: e,
        })?;
        std::fs::create_dir_all(output_dir)?;

        let has_header = !self.config.column_names.is_empty();
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(has_header)
            .flexible(true)
            .from_reader(source);

        let header = if has_header {
            Some(reader.headers()?.clone())
        } else {
            None
        };
        let key_column = self.key_column(header.as_ref(), input);

        let mut sink = PartitionSink {
            output_dir,
            prefix,
            delimiter,
            header: header.as_ref(),
            seen: HashSet::new(),
            output_paths: Vec::new(),
        };

        let chunk_size = self.config.chunk_size.max(1);
        let mut chunk: Vec<(String, StringRecord)> = Vec::with_capacity(chunk_size.min(65_536));
        let mut rows: u64 = 0;

        for record in reader.records() {
            let record = record?;
            let key = match key_column {
                KeyColumn::Position(i) => record.get(i).map(str::trim).unwrap_or(""),
                KeyColumn::Missing => "",
            };
            let key = if key.is_empty() {
                UNKNOWN_PARTITION.to_string()
            } else {
                sanitize_key(key)
            };
            chunk.push((key, record));
            rows += 1;

            if chunk.len() >= chunk_size {
                if cancel.is_cancelled() {
                    return Err(ProcessingError::Cancelled);
                }
                sink.flush(&mut chunk)?;
                debug!(rows, partitions = sink.output_paths.len(), "Split chunk flushed");
            }
        }
        sink.flush(&mut chunk)?;

        Ok(SplitOutcome {
            output_paths: sink.output_paths,
            rows,
        })
    }

    fn key_column(&self, header: Option<&StringRecord>, input: &Path) -> KeyColumn {
        match (&self.config.partition_key, header) {
            (PartitionKey::Index(i), _) => KeyColumn::Position(*i),
            (PartitionKey::Name(name), Some(header)) => {
                match header.iter().position(|h| h.trim() == name) {
                    Some(i) => KeyColumn::Position(i),
                    None => {
                        warn!(
                            file = %input.display(),
                            column = %name,
                            "Partition column missing from header, rows go to '{}'",
                            UNKNOWN_PARTITION
                        );
                        KeyColumn::Missing
                    }
                }
            }
            (PartitionKey::Name(_), None) => {
                KeyColumn::Position(self.config.partition_key_index)
            }
        }
    }
}

/// Open-on-demand writer set for partition files
struct PartitionSink<'a> {
    output_dir: &'a Path,
    prefix: &'a str,
    delimiter: u8,
    header: Option<&'a StringRecord>,
    /// Keys already written during this run
    seen: HashSet<String>,
    output_paths: Vec<PathBuf>,
}

impl PartitionSink<'_> {
    fn flush(&mut self, chunk: &mut Vec<(String, StringRecord)>) -> Result<(), ProcessingError> {
        let mut grouped: BTreeMap<String, Vec<StringRecord>> = BTreeMap::new();
        for (key, record) in chunk.drain(..) {
            grouped.entry(key).or_default().push(record);
        }

        for (key, records) in grouped {
            let path = self.output_dir.join(format!("{}{}.csv", self.prefix, key));
            // First touch in this run truncates leftovers from an earlier run
            let first_write = self.seen.insert(key);
            let file = if first_write {
                self.output_paths.push(path.clone());
                File::create(&path)?
            } else {
                OpenOptions::new().append(true).open(&path)?
            };

            let mut writer = WriterBuilder::new()
                .delimiter(self.delimiter)
                .flexible(true)
                .from_writer(file);
            if first_write {
                if let Some(header) = self.header {
                    writer.write_record(header)?;
                }
            }
            for record in &records {
                writer.write_record(record)?;
            }
            writer.flush()?;
        }
        Ok(())
    }
}
