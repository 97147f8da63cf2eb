//! Source connectors
//!
//! A connector copies one file from a source kind into a local destination.
//! The set of kinds is closed: [`Connector`] is an enum and each variant wraps
//! a concrete connector exposing the same `fetch` / `test_connection` pair.

pub mod http;
pub mod local;
pub mod object_store;
pub mod scp;
pub mod sql;

use graft_common::ImportSettings;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::models::{ConnectorKind, FetchResult, SourceConfig};

pub use self::http::HttpConnector;
pub use self::local::LocalConnector;
pub use self::object_store::ObjectStoreConnector;
pub use self::scp::ScpConnector;
pub use self::sql::SqlConnector;

/// Typed fetch failure; no partial fetch is ever reported as success
#[derive(Debug, Error)]
pub enum FetchError {
    /// Source object does not exist
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transfer exceeded its time bound
    #[error("Transfer timed out: {0}")]
    Timeout(String),

    /// Network, process or I/O failure
    #[error("Transfer failed: {0}")]
    Transport(String),

    /// Connector cannot run with the configuration it was given
    #[error("Connector configuration error: {0}")]
    Configuration(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => FetchError::Auth(err.to_string()),
            std::io::ErrorKind::TimedOut => FetchError::Timeout(err.to_string()),
            _ => FetchError::Transport(err.to_string()),
        }
    }
}

/// Connector selected by `connector_kind`
#[derive(Debug)]
pub enum Connector {
    Local(LocalConnector),
    SecureCopy(ScpConnector),
    ObjectStore(ObjectStoreConnector),
    Http(HttpConnector),
    Sql(SqlConnector),
}

impl Connector {
    /// Build the connector for a source, resolving named credentials from settings
    pub fn from_config(
        source: &SourceConfig,
        settings: &ImportSettings,
    ) -> Result<Self, ConfigError> {
        let connector = match source.connector_kind {
            ConnectorKind::Local => Connector::Local(LocalConnector::new()),
            ConnectorKind::SecureCopy => {
                Connector::SecureCopy(ScpConnector::from_config(source, settings)?)
            }
            ConnectorKind::ObjectStore => {
                Connector::ObjectStore(ObjectStoreConnector::from_config(source, settings)?)
            }
            ConnectorKind::Http => Connector::Http(HttpConnector::from_config(source, settings)?),
            ConnectorKind::Sql => Connector::Sql(SqlConnector::from_config(source, settings)?),
        };
        debug!(kind = connector.kind().as_str(), "Connector resolved");
        Ok(connector)
    }

    pub fn kind(&self) -> ConnectorKind {
        match self {
            Connector::Local(_) => ConnectorKind::Local,
            Connector::SecureCopy(_) => ConnectorKind::SecureCopy,
            Connector::ObjectStore(_) => ConnectorKind::ObjectStore,
            Connector::Http(_) => ConnectorKind::Http,
            Connector::Sql(_) => ConnectorKind::Sql,
        }
    }

    /// Fetch `source_path` into `dest_path`
    pub async fn fetch(&self, source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        ensure_parent_dir(dest_path).await?;

        let result = match self {
            Connector::Local(c) => c.fetch(source_path, dest_path).await,
            Connector::SecureCopy(c) => c.fetch(source_path, dest_path).await,
            Connector::ObjectStore(c) => c.fetch(source_path, dest_path).await,
            Connector::Http(c) => c.fetch(source_path, dest_path).await,
            Connector::Sql(c) => c.fetch(source_path, dest_path).await,
        }?;

        info!(
            kind = self.kind().as_str(),
            source = %source_path,
            dest = %result.local_path.display(),
            bytes = result.bytes_transferred,
            "Fetch complete"
        );
        Ok(result)
    }

    /// Cheap reachability check; never errors
    pub async fn test_connection(&self) -> bool {
        match self {
            Connector::Local(c) => c.test_connection().await,
            Connector::SecureCopy(c) => c.test_connection().await,
            Connector::ObjectStore(c) => c.test_connection().await,
            Connector::Http(c) => c.test_connection().await,
            Connector::Sql(c) => c.test_connection().await,
        }
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Size of a finished download
pub(crate) async fn file_size(path: &Path) -> Result<u64, FetchError> {
    Ok(tokio::fs::metadata(path).await?.len())
}

/// Sibling path a download is streamed into before it is moved into place
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Rename a finished partial file onto `dest`, or remove it when the write failed
pub(crate) async fn commit_partial<T>(
    partial: &Path,
    dest: &Path,
    written: Result<T, FetchError>,
) -> Result<T, FetchError> {
    match written {
        Ok(value) => {
            tokio::fs::rename(partial, dest).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(partial).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %partial.display(), error = %rm, "Failed to remove partial download");
                }
            }
            Err(e)
        }
    }
}

/// Connector parameter naming a settings entry, with `physical_name` as fallback
pub(crate) fn named_entry<'a>(source: &'a SourceConfig, key: &str) -> Option<&'a str> {
    source.param_str(key).or_else(|| {
        let name = source.physical_name.as_str();
        (!name.is_empty()).then_some(name)
    })
}
