//! Per-domain source and column configuration
//!
//! Both are resolved by a [`ConfigResolver`](crate::config::ConfigResolver) and
//! are read-only to the pipeline.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::ConfigError;

/// Closed set of source connector kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectorKind {
    /// File already reachable on a local or mounted path
    Local,
    /// Remote host reached through secure copy
    SecureCopy,
    /// S3-compatible object store
    ObjectStore,
    /// HTTP API or feed
    Http,
    /// SQL query against a configured database
    Sql,
}

impl ConnectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::Local => "local",
            ConnectorKind::SecureCopy => "scp",
            ConnectorKind::ObjectStore => "s3",
            ConnectorKind::Http => "http",
            ConnectorKind::Sql => "sql",
        }
    }
}

impl FromStr for ConnectorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" | "local" | "nas" | "filesystem" | "file" => Ok(ConnectorKind::Local),
            "sftp" | "scp" => Ok(ConnectorKind::SecureCopy),
            "s3" | "object_store" => Ok(ConnectorKind::ObjectStore),
            "api" | "http" | "feed" => Ok(ConnectorKind::Http),
            "database" | "db" | "sql" => Ok(ConnectorKind::Sql),
            other => Err(ConfigError::Invalid(format!(
                "Unknown connector type: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ConnectorKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectorKind> for String {
    fn from(kind: ConnectorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Where a domain's extract comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub connector_kind: ConnectorKind,
    /// Source path with `{cob_date}` / `{cob}` placeholders
    #[serde(default)]
    pub path_template: String,
    /// Table, endpoint path or object name, depending on the connector
    #[serde(default)]
    pub physical_name: String,
    /// Connector-specific parameters
    #[serde(default)]
    pub connector_params: serde_json::Map<String, serde_json::Value>,
}

impl SourceConfig {
    /// Expand the path template for a compact COB date
    pub fn source_path(&self, cob_date: &str) -> String {
        expand_template(&self.path_template, cob_date)
    }

    /// String parameter, if present and non-empty
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.connector_params
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Expand `{cob_date}` and `{cob}` placeholders
pub fn expand_template(template: &str, cob_date: &str) -> String {
    template
        .replace("{cob_date}", cob_date)
        .replace("{cob}", cob_date)
}

/// Column holding the partition key: by header name or 0-based position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionKey {
    Index(usize),
    Name(String),
}

impl Default for PartitionKey {
    fn default() -> Self {
        PartitionKey::Name("gfcid".to_string())
    }
}

/// Column projection and partitioning rules for a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub input_delimiter: String,
    pub output_delimiter: String,
    /// Source file's first line is a header
    pub has_header: bool,
    /// 1-based input columns to keep, in output order; empty keeps every column
    pub column_indices: Vec<usize>,
    /// Output header; injected by the cutter when the source has none
    pub column_names: Vec<String>,
    pub partition_key: PartitionKey,
    /// Partition key position used when the file carries no header
    pub partition_key_index: usize,
    /// Rows buffered by the splitter before flushing to partition files
    pub chunk_size: usize,
    /// Output locations; `{cob_date}` and `{dropbox_dir}` are expanded
    pub processed_output_dir: String,
    pub processed_output_file: String,
    pub split_output_dir: String,
    pub split_output_prefix: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            input_delimiter: "\u{1}".to_string(),
            output_delimiter: ",".to_string(),
            has_header: false,
            column_indices: Vec::new(),
            column_names: Vec::new(),
            partition_key: PartitionKey::default(),
            partition_key_index: 0,
            chunk_size: 50_000,
            processed_output_dir: "{dropbox_dir}/{cob_date}".to_string(),
            processed_output_file: "processed_{cob_date}.dat".to_string(),
            split_output_dir: "{dropbox_dir}/{cob_date}/split".to_string(),
            split_output_prefix: "split_{cob_date}-".to_string(),
        }
    }
}

impl ColumnConfig {
    /// Check structural constraints before any I/O
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_delimiter.is_empty() || self.output_delimiter.is_empty() {
            return Err(ConfigError::Invalid("Delimiters must not be empty".to_string()));
        }
        if self.column_indices.iter().any(|&i| i == 0) {
            return Err(ConfigError::Invalid(
                "Column indices are 1-based; 0 is not a valid index".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
        }
        if !self.column_indices.is_empty()
            && !self.column_names.is_empty()
            && self.column_indices.len() != self.column_names.len()
        {
            return Err(ConfigError::Invalid(format!(
                "{} column indices but {} column names",
                self.column_indices.len(),
                self.column_names.len()
            )));
        }
        Ok(())
    }

    /// Single-byte output delimiter, as required by the CSV writer/reader
    pub fn output_delimiter_byte(&self) -> Result<u8, ConfigError> {
        match self.output_delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(ConfigError::Invalid(format!(
                "Output delimiter must be a single byte, got {:?}",
                self.output_delimiter
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_kind_aliases() {
        assert_eq!("linux".parse::<ConnectorKind>().unwrap(), ConnectorKind::Local);
        assert_eq!("NAS".parse::<ConnectorKind>().unwrap(), ConnectorKind::Local);
        assert_eq!("sftp".parse::<ConnectorKind>().unwrap(), ConnectorKind::SecureCopy);
        assert_eq!("feed".parse::<ConnectorKind>().unwrap(), ConnectorKind::Http);
        assert_eq!("db".parse::<ConnectorKind>().unwrap(), ConnectorKind::Sql);
        assert!("ftp2".parse::<ConnectorKind>().is_err());
    }

    #[test]
    fn test_source_path_expands_both_placeholders() {
        let source = SourceConfig {
            connector_kind: ConnectorKind::Local,
            path_template: "/feeds/{cob}/txn_{cob_date}.dat".to_string(),
            physical_name: String::new(),
            connector_params: Default::default(),
        };
        assert_eq!(source.source_path("20251107"), "/feeds/20251107/txn_20251107.dat");
    }

    #[test]
    fn test_partition_key_untagged() {
        let by_name: PartitionKey = serde_json::from_str("\"cagid\"").unwrap();
        let by_index: PartitionKey = serde_json::from_str("3").unwrap();
        assert_eq!(by_name, PartitionKey::Name("cagid".to_string()));
        assert_eq!(by_index, PartitionKey::Index(3));
    }

    #[test]
    fn test_zero_index_rejected() {
        let config = ColumnConfig {
            column_indices: vec![1, 0, 3],
            ..ColumnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_names_must_match_indices() {
        let config = ColumnConfig {
            column_indices: vec![1, 2],
            column_names: vec!["a".into()],
            ..ColumnConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
