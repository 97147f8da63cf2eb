//! Shared fixtures for graft-import integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use graft_common::config::PostLoadPass;
use graft_common::{EventBus, ImportSettings};
use graft_import::config::{CatalogResolver, ColumnCatalog, DomainCatalog, SourceEntry};
use graft_import::graph::MemoryGraph;
use graft_import::models::{ColumnConfig, ConnectorKind, ImportRequest, PartitionKey, SourceConfig};
use graft_import::{ImportPipeline, WorkflowStore};

pub const COB: &str = "20250102";

/// Raw extract: `|`-delimited, no header, four columns
pub const EXTRACT: &str = "T1|G1|FX|5.0\nT2|G1|FX|7.5\nT3|G2|RATES|1.0\n";

pub fn request(domain_name: &str) -> ImportRequest {
    ImportRequest::new("CREDIT", domain_name, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap())
}

/// Columns keeping id, key and amount, partitioned by `gfcid`
pub fn columns() -> ColumnConfig {
    ColumnConfig {
        input_delimiter: "|".to_string(),
        output_delimiter: ",".to_string(),
        has_header: false,
        column_indices: vec![1, 2, 4],
        column_names: vec![
            "transaction_id".to_string(),
            "gfcid".to_string(),
            "mtm_usd_amount".to_string(),
        ],
        partition_key: PartitionKey::Name("gfcid".to_string()),
        chunk_size: 2,
        ..ColumnConfig::default()
    }
}

pub fn source(kind: ConnectorKind, path_template: impl Into<String>) -> SourceConfig {
    SourceConfig {
        connector_kind: kind,
        path_template: path_template.into(),
        physical_name: String::new(),
        connector_params: Default::default(),
    }
}

pub fn catalog(domain_name: &str, source: SourceConfig) -> CatalogResolver {
    let mut columns = ColumnCatalog::default();
    columns.domains.insert(domain_name.to_string(), self::columns());
    CatalogResolver::new(DomainCatalog {
        sources: vec![SourceEntry {
            domain_type: "CREDIT".to_string(),
            domain_name: domain_name.to_string(),
            source,
        }],
        columns,
    })
}

pub fn settings(dropbox: &Path) -> ImportSettings {
    let mut settings = ImportSettings {
        dropbox_dir: dropbox.to_path_buf(),
        ..ImportSettings::default()
    };
    settings.load.batch_size = 2;
    settings.load.workers = 2;
    settings
}

pub fn with_aggregate(mut settings: ImportSettings) -> ImportSettings {
    settings.graph.post_load = vec![PostLoadPass::Aggregate { measures: vec![] }];
    settings
}

/// Write the raw extract under `dir/feeds` and return its path
pub fn write_extract(dir: &Path) -> PathBuf {
    let feeds = dir.join("feeds");
    std::fs::create_dir_all(&feeds).unwrap();
    let path = feeds.join(format!("txn_{}.dat", COB));
    std::fs::write(&path, EXTRACT).unwrap();
    path
}

pub fn pipeline(resolver: CatalogResolver, settings: ImportSettings, graph: &MemoryGraph) -> Arc<ImportPipeline> {
    Arc::new(ImportPipeline::new(
        Arc::new(resolver),
        Arc::new(settings),
        WorkflowStore::new(),
        Arc::new(graph.clone()),
        EventBus::new(64),
    ))
}

/// Pipeline over a local extract at `<tmp>/feeds/txn_<cob>.dat`
pub fn local_pipeline(tmp: &Path, graph: &MemoryGraph) -> Arc<ImportPipeline> {
    let template = tmp.join("feeds").join("txn_{cob_date}.dat");
    let resolver = catalog(
        "olympus",
        source(ConnectorKind::Local, template.to_string_lossy().into_owned()),
    );
    pipeline(resolver, settings(&tmp.join("dropbox")), graph)
}

pub fn write_partition(dir: &Path, key: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("split_{}-{}.csv", COB, key));
    std::fs::write(&path, body).unwrap();
    path
}
