//! Column cutter
//!
//! Streams a delimited file line by line, keeping only the configured
//! 1-based columns. Missing fields are padded with an empty string. Output is
//! written as CSV, so fields holding the output delimiter or quotes are quoted.

use csv::WriterBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProcessingError;
use crate::models::ColumnConfig;

/// Lines between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 10_000;

/// Outcome of a cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutStats {
    /// Data rows written (any header excluded)
    pub rows: u64,
    /// Rows that had fewer fields than the highest requested index
    pub padded_rows: u64,
}

/// Projects and re-delimits a single file
pub struct ColumnCutter<'a> {
    config: &'a ColumnConfig,
}

impl<'a> ColumnCutter<'a> {
    pub fn new(config: &'a ColumnConfig) -> Self {
        Self { config }
    }

    /// Cut `input` into `output`, blocking; run on a blocking thread
    pub fn cut_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<CutStats, ProcessingError> {
        let source = File::open(input).map_err(|e| ProcessingError::Open {
            path: input.to_path_buf(),
            source: e,
        })?;
        let cfg = self.config;
        let mut reader = BufReader::new(source);
        let mut writer = WriterBuilder::new()
            .delimiter(cfg.output_delimiter_byte()?)
            .has_headers(false)
            .flexible(true)
            .from_writer(File::create(output)?);

        let in_delim = cfg.input_delimiter.as_str();
        let indices: Vec<usize> = cfg.column_indices.iter().map(|i| i - 1).collect();
        let max_index = indices.iter().copied().max();

        // Header: injected from column_names, or the source header renamed
        let mut skip_source_header = false;
        if !cfg.column_names.is_empty() {
            writer.write_record(&cfg.column_names)?;
            skip_source_header = cfg.has_header;
        }

        let mut stats = CutStats {
            rows: 0,
            padded_rows: 0,
        };
        let mut first_line = true;
        let mut lines_seen: u64 = 0;
        let mut buf = Vec::with_capacity(4096);

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            lines_seen += 1;
            if lines_seen % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ProcessingError::Cancelled);
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                continue;
            }

            let is_header = first_line && cfg.has_header;
            first_line = false;
            if is_header && skip_source_header {
                continue;
            }

            let fields: Vec<&str> = line.split(in_delim).collect();
            if indices.is_empty() {
                writer.write_record(&fields)?;
            } else {
                if max_index.is_some_and(|m| m >= fields.len()) {
                    stats.padded_rows += 1;
                }
                writer.write_record(indices.iter().map(|&i| fields.get(i).copied().unwrap_or("")))?;
            }

            if !is_header {
                stats.rows += 1;
            }
        }

        writer.flush()?;

        if stats.padded_rows > 0 {
            warn!(
                file = %input.display(),
                padded_rows = stats.padded_rows,
                "Rows shorter than requested columns were padded with empty values"
            );
        }
        debug!(file = %input.display(), rows = stats.rows, "Cut complete");
        Ok(stats)
    }
}
