//! S3-compatible object store connector

use futures::{Stream, StreamExt};
use graft_common::config::ObjectStoreSettings;
use graft_common::ImportSettings;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{commit_partial, named_entry, partial_path, FetchError};
use crate::config::ConfigError;
use crate::models::{FetchResult, SourceConfig};

/// Downloads one object per fetch, streaming the body to disk
#[derive(Clone)]
pub struct ObjectStoreConnector {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for ObjectStoreConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConnector")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreConnector {
    /// Wrap an already-built store
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Resolve the store named by `store_name` (or `physical_name`)
    pub fn from_config(source: &SourceConfig, settings: &ImportSettings) -> Result<Self, ConfigError> {
        let name = named_entry(source, "store_name").ok_or_else(|| {
            ConfigError::Invalid("Object store source requires a store_name parameter".to_string())
        })?;
        let store_settings = settings.object_stores.get(name).ok_or_else(|| {
            ConfigError::NotFound(format!("No object store settings found for {}", name))
        })?;
        Self::from_settings(store_settings)
    }

    pub fn from_settings(settings: &ObjectStoreSettings) -> Result<Self, ConfigError> {
        let mut client_options = ClientOptions::new();
        if let Some(proxy) = settings.proxy.as_deref().filter(|p| !p.is_empty()) {
            client_options = client_options.with_proxy_url(proxy);
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_client_options(client_options);

        if let Some(endpoint) = settings.endpoint.as_deref() {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Object store settings: {}", e)))?;
        Ok(Self::new(Arc::new(store), settings.bucket.clone()))
    }

    pub async fn fetch(&self, source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        let key = object_key(source_path);
        debug!(bucket = %self.bucket, key = %key, "Downloading object");

        let result = self.store.get(&key).await.map_err(classify)?;
        let partial = partial_path(dest_path);
        let written = write_stream(result.into_stream(), &partial).await;
        let bytes = commit_partial(&partial, dest_path, written).await?;

        Ok(FetchResult {
            local_path: dest_path.to_path_buf(),
            bytes_transferred: bytes,
        })
    }

    pub async fn test_connection(&self) -> bool {
        self.store.list_with_delimiter(None).await.is_ok()
    }
}

/// Stream an object body into `path`, returning the bytes written
async fn write_stream<S, B>(mut stream: S, path: &Path) -> Result<u64, FetchError>
where
    S: Stream<Item = object_store::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut bytes: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        file.write_all(chunk.as_ref()).await?;
        bytes += chunk.as_ref().len() as u64;
    }
    file.flush().await?;
    Ok(bytes)
}

/// Object key for a source path: leading `/` stripped
fn object_key(source_path: &str) -> ObjectPath {
    ObjectPath::from(source_path.trim_start_matches('/'))
}

fn classify(err: object_store::Error) -> FetchError {
    match err {
        object_store::Error::NotFound { path, .. } => FetchError::NotFound(path),
        other => {
            let message = other.to_string();
            if message.contains("403")
                || message.contains("Forbidden")
                || message.contains("InvalidAccessKeyId")
                || message.contains("SignatureDoesNotMatch")
            {
                FetchError::Auth(message)
            } else {
                FetchError::Transport(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_streams_body() {
        let store = Arc::new(InMemory::new());
        store
            .put(
                &ObjectPath::from("feeds/20250102/extract.dat"),
                PutPayload::from_static(b"id,gfcid\nT1,G1\n"),
            )
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("extract.dat");
        let connector = ObjectStoreConnector::new(store, "test");
        let result = connector
            .fetch("/feeds/20250102/extract.dat", &dest)
            .await
            .unwrap();

        assert_eq!(result.bytes_transferred, 15);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "id,gfcid\nT1,G1\n");
        assert!(!partial_path(&dest).exists());
        assert!(connector.test_connection().await);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let connector = ObjectStoreConnector::new(Arc::new(InMemory::new()), "test");
        let err = connector
            .fetch("nope.dat", &dir.path().join("nope.dat"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_interrupted_body_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("extract.dat");
        let partial = partial_path(&dest);
        let body = futures::stream::iter(vec![
            Ok(b"T1,G1\n".to_vec()),
            Err(object_store::Error::Generic {
                store: "test",
                source: "connection reset".into(),
            }),
        ]);

        let written = write_stream(body, &partial).await;
        let err = commit_partial(&partial, &dest, written).await.unwrap_err();

        assert!(matches!(err, FetchError::Transport(_)));
        assert!(!dest.exists());
        assert!(!partial.exists());
    }

    #[test]
    fn test_builder_accepts_proxy_and_endpoint() {
        let settings = ObjectStoreSettings {
            bucket: "extracts".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://minio.local:9000".into()),
            access_key: "AK".into(),
            secret_key: "SK".into(),
            proxy: Some("http://proxy.local:3128".into()),
        };
        assert!(ObjectStoreConnector::from_settings(&settings).is_ok());
    }
}
