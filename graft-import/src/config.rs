//! Domain configuration resolution
//!
//! The pipeline never parses configuration files itself. It asks a
//! [`ConfigResolver`] for the `SourceConfig` and `ColumnConfig` of a domain.
//! [`CatalogResolver`] is the TOML-backed implementation:
//!
//! ```toml
//! [[sources]]
//! domain_type = "CREDIT"
//! domain_name = "olympus"
//! connector_kind = "linux"
//! path_template = "/feeds/{cob_date}/olympus_{cob_date}.dat"
//!
//! [columns.defaults]
//! output_delimiter = ","
//!
//! [columns.domains.olympus]
//! column_indices = [2, 4, 5]
//! column_names = ["transaction_id", "gfcid", "mtm_usd_amount"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{ColumnConfig, SourceConfig};

/// Missing or invalid configuration; always fatal before any I/O
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration entry for the requested domain
    #[error("No configuration found: {0}")]
    NotFound(String),

    /// Configuration present but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Catalog file could not be read
    #[error("Catalog IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file could not be parsed
    #[error("Catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Provider of already-resolved per-domain configuration
pub trait ConfigResolver: Send + Sync {
    /// Source configuration for `(domain_type, domain_name)`
    fn resolve_source(
        &self,
        domain_type: &str,
        domain_name: &str,
    ) -> Result<SourceConfig, ConfigError>;

    /// Column configuration for a domain, falling back to defaults
    fn resolve_columns(&self, domain_name: &str) -> ColumnConfig;
}

/// One catalog row binding a domain to its source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEntry {
    pub domain_type: String,
    pub domain_name: String,
    #[serde(flatten)]
    pub source: SourceConfig,
}

/// Column configuration section of the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ColumnCatalog {
    #[serde(default)]
    pub defaults: ColumnConfig,
    #[serde(default)]
    pub domains: BTreeMap<String, ColumnConfig>,
}

/// Complete domain catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainCatalog {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub columns: ColumnCatalog,
}

/// Resolver over an in-memory [`DomainCatalog`]
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    catalog: DomainCatalog,
}

impl CatalogResolver {
    pub fn new(catalog: DomainCatalog) -> Self {
        Self { catalog }
    }

    /// Load a catalog from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let resolver = Self::from_toml_str(&content)?;
        debug!(
            path = %path.display(),
            sources = resolver.catalog.sources.len(),
            "Domain catalog loaded"
        );
        Ok(resolver)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let catalog: DomainCatalog = toml::from_str(content)?;
        Ok(Self::new(catalog))
    }

    pub fn catalog(&self) -> &DomainCatalog {
        &self.catalog
    }
}

impl ConfigResolver for CatalogResolver {
    fn resolve_source(
        &self,
        domain_type: &str,
        domain_name: &str,
    ) -> Result<SourceConfig, ConfigError> {
        let wanted_type = domain_type.trim().to_uppercase();
        let wanted_name = domain_name.trim().to_lowercase();

        self.catalog
            .sources
            .iter()
            .find(|entry| {
                entry.domain_type.trim().to_uppercase() == wanted_type
                    && entry.domain_name.trim().to_lowercase() == wanted_name
            })
            .map(|entry| entry.source.clone())
            .ok_or_else(|| {
                ConfigError::NotFound(format!(
                    "No data source configuration found for {}/{}",
                    domain_type, domain_name
                ))
            })
    }

    fn resolve_columns(&self, domain_name: &str) -> ColumnConfig {
        let wanted = domain_name.trim().to_lowercase();
        match self
            .catalog
            .columns
            .domains
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
        {
            Some((_, config)) => config.clone(),
            None => {
                warn!(domain = %domain_name, "Using default column config");
                self.catalog.columns.defaults.clone()
            }
        }
    }
}
