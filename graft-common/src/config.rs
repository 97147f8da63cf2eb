//! Settings model and configuration file resolution
//!
//! Settings are read from a TOML file. The file location is resolved in this
//! priority order:
//! 1. Explicit path (command-line argument)
//! 2. `GRAFT_CONFIG` environment variable
//! 3. `<config_dir>/graft/settings.toml` (platform config directory)
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "GRAFT_CONFIG";

/// Application settings shared by every phase of an import
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSettings {
    /// Landing directory for fetched, processed and split files
    #[serde(default = "default_dropbox_dir")]
    pub dropbox_dir: PathBuf,

    /// Domain catalog (source and column configuration per domain)
    #[serde(default)]
    pub catalog: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default)]
    pub load: LoadSettings,

    /// Secure-copy hosts keyed by server name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerCredentials>,

    /// Object stores keyed by logical name
    #[serde(default)]
    pub object_stores: BTreeMap<String, ObjectStoreSettings>,

    /// HTTP endpoints keyed by logical name
    #[serde(default)]
    pub http_endpoints: BTreeMap<String, HttpEndpointSettings>,

    /// SQL databases keyed by logical name
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseSettings>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            dropbox_dir: default_dropbox_dir(),
            catalog: None,
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            graph: GraphSettings::default(),
            load: LoadSettings::default(),
            servers: BTreeMap::new(),
            object_stores: BTreeMap::new(),
            http_endpoints: BTreeMap::new(),
            databases: BTreeMap::new(),
        }
    }
}

fn default_dropbox_dir() -> PathBuf {
    PathBuf::from("/mnt/nas")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP hosting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5740".to_string()
}

/// Graph database connection descriptor plus load-time graph shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphSettings {
    /// Bolt URI, e.g. `bolt://graph.internal:7687`
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database name
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub schema: GraphSchema,
    /// Passes executed after every file of a batch loaded without failure
    #[serde(default)]
    pub post_load: Vec<PostLoadPass>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            uri: None,
            user: None,
            password: None,
            database: None,
            max_connections: default_max_connections(),
            schema: GraphSchema::default(),
            post_load: Vec::new(),
        }
    }
}

fn default_max_connections() -> usize {
    8
}

/// Labels, keys and typed fields of the summary/detail graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphSchema {
    /// Label of the aggregation-key node
    pub summary_label: String,
    /// Natural key of the summary node; also the detail column matched against it
    pub summary_key: String,
    /// Label of the per-row node
    pub detail_label: String,
    /// Unique natural id column of a detail row
    pub detail_key: String,
    /// Relationship type from detail to summary
    pub relationship: String,
    /// Detail columns parsed as floating point
    pub measure_fields: Vec<String>,
    /// Additional detail properties to index
    pub detail_indexes: Vec<String>,
}

impl Default for GraphSchema {
    fn default() -> Self {
        Self {
            summary_label: "Summary_GFCID".to_string(),
            summary_key: "gfcid".to_string(),
            detail_label: "Transaction".to_string(),
            detail_key: "transaction_id".to_string(),
            relationship: "TRANSACTIONS".to_string(),
            measure_fields: vec![
                "mtm_usd_amount".to_string(),
                "mtm_local_amount".to_string(),
            ],
            detail_indexes: Vec::new(),
        }
    }
}

/// Idempotent graph pass run after a batch of files has loaded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostLoadPass {
    /// Recompute `detail_count` and `total_<measure>` on every summary node.
    /// An empty `measures` list uses the schema's measure fields.
    Aggregate {
        #[serde(default)]
        measures: Vec<String>,
    },
    /// Link summary nodes whose detail nodes share a value of `via_field`
    LinkSummaries {
        via_field: String,
        relationship: String,
    },
}

/// Load phase tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadSettings {
    /// Rows per transactional unit
    pub batch_size: usize,
    /// Files loaded concurrently, each by its own session
    pub workers: usize,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 4,
        }
    }
}

/// Secure-copy host credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerCredentials {
    /// Host name; defaults to the server name this entry is keyed by
    #[serde(default)]
    pub host: Option<String>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// S3-compatible object store credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// HTTP API endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpEndpointSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// SQL database connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSettings {
    /// Backend dialect (postgres, mysql, sqlite, mssql, oracle, sybase, hive, mongodb)
    pub backend: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    /// ODBC driver name (mssql)
    #[serde(default)]
    pub driver: Option<String>,
    /// Oracle service name
    #[serde(default)]
    pub service_name: Option<String>,
    /// MongoDB authentication database
    #[serde(default)]
    pub auth_source: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Database file (sqlite)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl ImportSettings {
    /// Load settings following the resolution priority order.
    ///
    /// Returns built-in defaults when no settings file can be found.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_settings_path(cli_path) {
            Some(path) => load_settings(&path),
            None => {
                info!("No settings file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Resolve the settings file location.
///
/// An explicit path or environment path is returned even if it does not exist,
/// so that a typo surfaces as an error instead of silently falling back.
pub fn resolve_settings_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("graft").join("settings.toml"))
        .filter(|p| p.exists())
}

/// Load settings from a TOML file
pub fn load_settings(path: &Path) -> Result<ImportSettings> {
    if !path.exists() {
        return Err(Error::SettingsNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let settings = toml::from_str(&content).map_err(|source| Error::InvalidSettings {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), "Settings loaded");
    Ok(settings)
}

/// Write settings atomically (temp file + rename)
pub fn write_settings(settings: &ImportSettings, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(settings)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_defaults() {
        let settings = ImportSettings::default();
        assert_eq!(settings.dropbox_dir, PathBuf::from("/mnt/nas"));
        assert_eq!(settings.load.batch_size, 1000);
        assert_eq!(settings.load.workers, 4);
        assert_eq!(settings.graph.schema.summary_label, "Summary_GFCID");
        assert_eq!(settings.graph.schema.detail_key, "transaction_id");
        assert!(settings.graph.post_load.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = ImportSettings::from_toml_str("").unwrap();
        assert_eq!(settings, ImportSettings::default());
    }

    #[test]
    fn test_post_load_passes_parse() {
        let settings = ImportSettings::from_toml_str(
            r#"
            [[graph.post_load]]
            kind = "aggregate"

            [[graph.post_load]]
            kind = "link_summaries"
            via_field = "cagid"
            relationship = "SHARES_CAGID"
            "#,
        )
        .unwrap();

        assert_eq!(settings.graph.post_load.len(), 2);
        assert_eq!(
            settings.graph.post_load[0],
            PostLoadPass::Aggregate { measures: vec![] }
        );
        assert_eq!(
            settings.graph.post_load[1],
            PostLoadPass::LinkSummaries {
                via_field: "cagid".to_string(),
                relationship: "SHARES_CAGID".to_string(),
            }
        );
    }
}
