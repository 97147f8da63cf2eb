//! SQL query connector
//!
//! Connection URLs are built per backend. Queries run through the `sqlx` Any
//! driver, which covers postgres, mysql and sqlite; other backends get a URL
//! but fail at fetch time.

use futures::TryStreamExt;
use graft_common::config::DatabaseSettings;
use graft_common::ImportSettings;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Column, Connection, Row};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{commit_partial, partial_path, FetchError};
use crate::config::ConfigError;
use crate::models::{FetchResult, SourceConfig};

/// Rows rendered per write to the destination file
const WRITE_BATCH: usize = 1000;

/// Backend dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBackend {
    Postgres,
    MySql,
    Sqlite,
    MsSql,
    Oracle,
    Sybase,
    Hive,
    MongoDb,
}

impl SqlBackend {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlBackend::Postgres),
            "mysql" => Ok(SqlBackend::MySql),
            "sqlite" => Ok(SqlBackend::Sqlite),
            "mssql" | "sqlserver" | "sql_server" => Ok(SqlBackend::MsSql),
            "oracle" => Ok(SqlBackend::Oracle),
            "sybase" => Ok(SqlBackend::Sybase),
            "hive" => Ok(SqlBackend::Hive),
            "mongodb" | "mongo" => Ok(SqlBackend::MongoDb),
            other => Err(ConfigError::Invalid(format!(
                "Unsupported database type '{}'",
                other
            ))),
        }
    }

    /// Whether queries can be executed by the bundled driver
    pub fn is_executable(self) -> bool {
        matches!(self, SqlBackend::Postgres | SqlBackend::MySql | SqlBackend::Sqlite)
    }
}

/// Connection URL for a database entry
pub fn build_connection_url(db: &DatabaseSettings) -> Result<String, ConfigError> {
    let backend = SqlBackend::parse(&db.backend)?;
    let user = db.user.as_deref().unwrap_or_default();
    let password = db.password.as_deref().unwrap_or_default();
    let host = db.host.as_deref().unwrap_or("localhost");
    let database = db.database.as_deref().unwrap_or_default();
    let port = |default: u16| db.port.unwrap_or(default);

    let url = match backend {
        SqlBackend::Postgres => format!(
            "postgres://{}:{}@{}:{}/{}",
            user,
            password,
            host,
            port(5432),
            database
        ),
        SqlBackend::MySql => format!(
            "mysql://{}:{}@{}:{}/{}",
            user,
            password,
            host,
            port(3306),
            database
        ),
        SqlBackend::Sqlite => {
            let path = db
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .or_else(|| db.database.clone())
                .ok_or_else(|| ConfigError::Invalid("sqlite database requires a path".to_string()))?;
            format!("sqlite://{}", path)
        }
        SqlBackend::MsSql => {
            let driver = db
                .driver
                .as_deref()
                .unwrap_or("ODBC Driver 17 for SQL Server")
                .replace(' ', "+");
            format!(
                "mssql://{}:{}@{}:{}/{}?driver={}",
                user,
                password,
                host,
                port(1433),
                database,
                driver
            )
        }
        SqlBackend::Oracle => format!(
            "oracle://{}:{}@{}:{}/?service_name={}",
            user,
            password,
            host,
            port(1521),
            db.service_name.as_deref().unwrap_or_default()
        ),
        SqlBackend::Sybase => format!(
            "sybase://{}:{}@{}:{}/{}",
            user,
            password,
            host,
            port(5000),
            database
        ),
        SqlBackend::Hive => format!(
            "hive://{}:{}@{}:{}/{}",
            user,
            password,
            host,
            port(10000),
            database
        ),
        SqlBackend::MongoDb => {
            let credentials = match (db.user.as_deref(), db.password.as_deref()) {
                (Some(u), Some(p)) => format!("{}:{}@", u, p),
                (Some(u), None) => format!("{}@", u),
                _ => String::new(),
            };
            let mut query: Vec<String> = Vec::new();
            if let Some(source) = db.auth_source.as_deref() {
                query.push(format!("authSource={}", source));
            }
            query.extend(db.options.iter().map(|(k, v)| format!("{}={}", k, v)));
            let query = if query.is_empty() {
                String::new()
            } else {
                format!("?{}", query.join("&"))
            };
            format!(
                "mongodb://{}{}:{}/{}{}",
                credentials,
                host,
                port(27017),
                database,
                query
            )
        }
    };
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct SqlConnector {
    backend: SqlBackend,
    url: String,
    query: String,
}

impl SqlConnector {
    /// Resolve the database named by the `connection` parameter
    pub fn from_config(source: &SourceConfig, settings: &ImportSettings) -> Result<Self, ConfigError> {
        let name = source.param_str("connection").ok_or_else(|| {
            ConfigError::Invalid("SQL source requires a connection parameter".to_string())
        })?;
        let db = settings.databases.get(name).ok_or_else(|| {
            ConfigError::NotFound(format!("No database configuration for '{}'", name))
        })?;

        let query = source
            .param_str("sql")
            .or_else(|| source.param_str("query"))
            .map(str::to_string)
            .or_else(|| {
                (!source.physical_name.is_empty())
                    .then(|| format!("SELECT * FROM {}", source.physical_name))
            })
            .ok_or_else(|| {
                ConfigError::Invalid("SQL source needs a query or a physical_name".to_string())
            })?;

        Ok(Self {
            backend: SqlBackend::parse(&db.backend)?,
            url: build_connection_url(db)?,
            query,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    async fn connect(&self) -> Result<AnyConnection, FetchError> {
        if !self.backend.is_executable() {
            return Err(FetchError::Configuration(format!(
                "Query execution is not supported for {:?} backends",
                self.backend
            )));
        }
        sqlx::any::install_default_drivers();
        AnyConnection::connect(&self.url).await.map_err(classify)
    }

    /// Run the query and land the result set as CSV; `source_path` is unused
    pub async fn fetch(&self, _source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        let mut conn = self.connect().await?;
        debug!(backend = ?self.backend, query = %self.query, "Executing database query");

        let partial = partial_path(dest_path);
        let written = self.export_rows(&mut conn, &partial).await;

        // Connection errors on close are irrelevant once the rows are on disk
        let _ = conn.close().await;
        let (bytes, row_count) = commit_partial(&partial, dest_path, written).await?;

        debug!(rows = row_count, "Query result written");
        Ok(FetchResult {
            local_path: dest_path.to_path_buf(),
            bytes_transferred: bytes,
        })
    }

    /// Stream the result set into `path`; returns bytes and rows written
    async fn export_rows(&self, conn: &mut AnyConnection, path: &Path) -> Result<(u64, u64), FetchError> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut bytes: u64 = 0;
        let mut pending: Vec<Vec<String>> = Vec::with_capacity(WRITE_BATCH);
        let mut header_written = false;
        let mut row_count: u64 = 0;

        {
            let mut rows = sqlx::query(&self.query).fetch(&mut *conn);
            while let Some(row) = rows.try_next().await.map_err(classify)? {
                if !header_written {
                    let header = row.columns().iter().map(|c| c.name().to_string()).collect();
                    bytes += write_records(&mut file, &[header]).await?;
                    header_written = true;
                }
                pending.push(row_cells(&row));
                row_count += 1;
                if pending.len() >= WRITE_BATCH {
                    bytes += write_records(&mut file, &pending).await?;
                    pending.clear();
                }
            }
        }
        bytes += write_records(&mut file, &pending).await?;
        file.flush().await?;
        Ok((bytes, row_count))
    }

    pub async fn test_connection(&self) -> bool {
        match self.connect().await {
            Ok(mut conn) => {
                let ok = conn.ping().await.is_ok();
                let _ = conn.close().await;
                ok
            }
            Err(_) => false,
        }
    }
}

async fn write_records(file: &mut tokio::fs::File, records: &[Vec<String>]) -> Result<u64, FetchError> {
    if records.is_empty() {
        return Ok(0);
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .write_record(record)
            .map_err(|e| FetchError::Transport(format!("Failed to render row: {}", e)))?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|e| FetchError::Transport(format!("Failed to render rows: {}", e)))?;
    file.write_all(&buffer).await?;
    Ok(buffer.len() as u64)
}

/// Render every column of a row as text; NULL becomes an empty cell
fn row_cells(row: &AnyRow) -> Vec<String> {
    (0..row.columns().len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                return v.unwrap_or_default();
            }
            if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                return v.map(|n| n.to_string()).unwrap_or_default();
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                return v.map(|n| n.to_string()).unwrap_or_default();
            }
            if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                return v.map(|b| b.to_string()).unwrap_or_default();
            }
            if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
                return v
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
            }
            String::new()
        })
        .collect()
}

fn classify(err: sqlx::Error) -> FetchError {
    let message = format!("Database query failed: {}", err);
    match &err {
        sqlx::Error::PoolTimedOut => FetchError::Timeout(message),
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            FetchError::Timeout(message)
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            FetchError::Transport(message)
        }
        sqlx::Error::Configuration(_) => FetchError::Configuration(message),
        sqlx::Error::Database(db) => {
            let text = db.message().to_ascii_lowercase();
            if text.contains("authentication") || text.contains("access denied") {
                FetchError::Auth(message)
            } else if text.contains("no such table") || text.contains("does not exist") {
                FetchError::NotFound(message)
            } else {
                FetchError::Transport(message)
            }
        }
        _ => FetchError::Transport(message),
    }
}
