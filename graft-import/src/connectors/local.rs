//! Local / mounted filesystem connector

use std::path::Path;
use tracing::debug;

use super::{file_size, FetchError};
use crate::models::FetchResult;

/// Copies a file already reachable on a local or mounted path
#[derive(Debug, Default, Clone)]
pub struct LocalConnector;

impl LocalConnector {
    pub fn new() -> Self {
        Self
    }

    pub async fn fetch(&self, source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        let source = Path::new(source_path);
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(FetchError::NotFound(source_path.to_string()));
        }

        // Source already at its landing location
        if same_file(source, dest_path).await {
            debug!(path = %dest_path.display(), "Source already in place, skipping copy");
            let bytes = file_size(dest_path).await?;
            return Ok(FetchResult {
                local_path: dest_path.to_path_buf(),
                bytes_transferred: bytes,
            });
        }

        let bytes = tokio::fs::copy(source, dest_path).await?;
        Ok(FetchResult {
            local_path: dest_path.to_path_buf(),
            bytes_transferred: bytes,
        })
    }

    pub async fn test_connection(&self) -> bool {
        true
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
