//! HTTP API / feed connector
//!
//! The response body is landed as CSV: JSON bodies are flattened into a
//! table, anything else becomes a single `response` column.

use graft_common::config::HttpEndpointSettings;
use graft_common::ImportSettings;
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::FetchError;
use crate::config::ConfigError;
use crate::models::{FetchResult, SourceConfig};

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Request shape resolved from connector parameters
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub params: Vec<(String, String)>,
    pub payload: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: Option<String>,
    /// Endpoint path used when the source path is empty
    physical_name: String,
    request: HttpRequestSpec,
}

impl HttpConnector {
    pub fn from_config(source: &SourceConfig, settings: &ImportSettings) -> Result<Self, ConfigError> {
        let endpoint = match source.param_str("endpoint") {
            Some(name) => Some(settings.http_endpoints.get(name).ok_or_else(|| {
                ConfigError::NotFound(format!("No API configuration found for '{}'", name))
            })?),
            None => None,
        };

        let request = request_spec(&source.connector_params, endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(request.timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: endpoint.map(|e| e.base_url.trim_end_matches('/').to_string()),
            physical_name: source.physical_name.clone(),
            request,
        })
    }

    /// Absolute URL for a source path
    pub fn url_for(&self, source_path: &str) -> Result<String, FetchError> {
        if source_path.starts_with("http://") || source_path.starts_with("https://") {
            return Ok(source_path.to_string());
        }
        let path = if source_path.is_empty() {
            self.physical_name.as_str()
        } else {
            source_path
        };
        match &self.base_url {
            Some(base) => {
                let path = path.trim_start_matches('/');
                Ok(if path.is_empty() {
                    base.clone()
                } else {
                    format!("{}/{}", base, path)
                })
            }
            None if path.starts_with("http://") || path.starts_with("https://") => {
                Ok(path.to_string())
            }
            None => Err(FetchError::Configuration(format!(
                "No endpoint configured and '{}' is not an absolute URL",
                path
            ))),
        }
    }

    pub async fn fetch(&self, source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        let url = self.url_for(source_path)?;
        debug!(method = %self.request.method, url = %url, "Performing HTTP request");

        let mut builder = self.client.request(self.request.method.clone(), &url);
        for (name, value) in &self.request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !self.request.params.is_empty() {
            builder = builder.query(&self.request.params);
        }
        builder = match &self.request.payload {
            Some(Value::String(raw)) => builder.body(raw.clone()),
            Some(json) => builder.json(json),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| classify(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("API request failed for '{}': HTTP {}", url, status);
            return Err(match status.as_u16() {
                401 | 403 => FetchError::Auth(message),
                404 => FetchError::NotFound(message),
                _ => FetchError::Transport(message),
            });
        }

        let body = response.text().await.map_err(|e| classify(&url, e))?;
        let table = match serde_json::from_str::<Value>(&body) {
            Ok(json) => normalize_json(&json),
            Err(_) => {
                debug!(url = %url, "Response is not JSON, wrapping raw text");
                Table::single("response", body)
            }
        };

        let csv_bytes = table.to_csv()?;
        tokio::fs::write(dest_path, &csv_bytes).await?;
        Ok(FetchResult {
            local_path: dest_path.to_path_buf(),
            bytes_transferred: csv_bytes.len() as u64,
        })
    }

    pub async fn test_connection(&self) -> bool {
        let Ok(url) = self.url_for("") else {
            return false;
        };
        self.client.head(&url).send().await.is_ok()
    }
}

fn request_spec(
    params: &Map<String, Value>,
    endpoint: Option<&HttpEndpointSettings>,
) -> Result<HttpRequestSpec, ConfigError> {
    let method = params
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ConfigError::Invalid(format!("Unsupported HTTP method: {}", method)))?;

    // Endpoint secrets first, caller overrides win
    let mut headers = BTreeMap::new();
    if let Some(endpoint) = endpoint {
        let authorization = endpoint.api_secret.as_ref().or(endpoint.api_key.as_ref());
        if let Some(value) = authorization.filter(|v| !v.is_empty()) {
            headers.insert("Authorization".to_string(), value.clone());
        }
        if let Some(key) = endpoint.api_key.as_ref().filter(|v| !v.is_empty()) {
            headers.insert("X-Api-Key".to_string(), key.clone());
        }
        headers.extend(endpoint.headers.clone());
    }
    headers.extend(string_map(params.get("headers"), "headers")?);

    let query = string_map(params.get("params"), "params")?.into_iter().collect();

    let payload = match params.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone())),
        ),
        Some(other) => Some(other.clone()),
    };

    let timeout_secs = params
        .get("timeout")
        .and_then(Value::as_f64)
        .filter(|t| *t > 0.0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(HttpRequestSpec {
        method,
        headers,
        params: query,
        payload,
        timeout: Duration::from_secs_f64(timeout_secs),
    })
}

/// Object (or JSON-encoded object string) of string-convertible values
fn string_map(value: Option<&Value>, what: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let object = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(BTreeMap::new()),
        Some(Value::String(s)) => serde_json::from_str::<Map<String, Value>>(s)
            .map_err(|_| ConfigError::Invalid(format!("Unable to parse {} mapping: {}", what, s)))?,
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(ConfigError::Invalid(format!(
                "Expected a mapping for {}, got {}",
                what, other
            )))
        }
    };
    Ok(object
        .into_iter()
        .map(|(k, v)| (k, cell_text(&v)))
        .collect())
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    let message = format!("API request failed for '{}': {}", url, err);
    if err.is_timeout() {
        FetchError::Timeout(message)
    } else {
        FetchError::Transport(message)
    }
}

/// Column-ordered table produced from a response body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl Table {
    fn single(column: &str, value: String) -> Self {
        let mut row = BTreeMap::new();
        row.insert(column.to_string(), value);
        Self {
            columns: vec![column.to_string()],
            rows: vec![row],
        }
    }

    fn push_row(&mut self, row: BTreeMap<String, String>, order: Vec<String>) {
        for column in order {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.rows.push(row);
    }

    fn to_csv(&self) -> Result<Vec<u8>, FetchError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let io = |e: csv::Error| FetchError::Transport(format!("Failed to write response table: {}", e));

        writer.write_record(&self.columns).map_err(io)?;
        for row in &self.rows {
            let record = self
                .columns
                .iter()
                .map(|c| row.get(c).map(String::as_str).unwrap_or(""));
            writer.write_record(record).map_err(io)?;
        }
        writer
            .into_inner()
            .map_err(|e| FetchError::Transport(format!("Failed to flush response table: {}", e)))
    }
}

/// Flatten a JSON document into rows
///
/// Objects become one row each with nested keys joined by `.`; arrays nested
/// inside a row are kept as JSON text. Scalars land in a `value` column.
pub fn normalize_json(value: &Value) -> Table {
    let mut table = Table::default();
    match value {
        Value::Array(items) => {
            for item in items {
                let (row, order) = flatten_row(item);
                table.push_row(row, order);
            }
        }
        other => {
            let (row, order) = flatten_row(other);
            table.push_row(row, order);
        }
    }
    table
}

fn flatten_row(value: &Value) -> (BTreeMap<String, String>, Vec<String>) {
    let mut row = BTreeMap::new();
    let mut order = Vec::new();
    match value {
        Value::Object(map) => flatten_into(map, "", &mut row, &mut order),
        scalar => {
            row.insert("value".to_string(), cell_text(scalar));
            order.push("value".to_string());
        }
    }
    (row, order)
}

fn flatten_into(
    map: &Map<String, Value>,
    prefix: &str,
    row: &mut BTreeMap<String, String>,
    order: &mut Vec<String>,
) {
    for (key, value) in map {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(inner, &column, row, order),
            other => {
                row.insert(column.clone(), cell_text(other));
                order.push(column);
            }
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
