//! Neo4j backend over Bolt
//!
//! The driver pool is created lazily on the first session, so building the
//! backend never touches the network. Each write operation runs in its own
//! explicit transaction.

use graft_common::config::{GraphSchema, GraphSettings, PostLoadPass};
use neo4rs::{query, BoltFloat, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query};
use std::collections::HashSet;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{cypher, DetailRecord, GraphBackend, GraphError, GraphSession, PropertyValue, WriteCounters};

/// Session factory for a Neo4j database
pub struct Neo4jBackend {
    settings: GraphSettings,
    graph: OnceCell<Graph>,
}

impl Neo4jBackend {
    pub fn new(settings: GraphSettings) -> Self {
        Self {
            settings,
            graph: OnceCell::new(),
        }
    }

    async fn graph(&self) -> Result<&Graph, GraphError> {
        self.graph
            .get_or_try_init(|| async {
                let uri = self
                    .settings
                    .uri
                    .as_deref()
                    .ok_or_else(|| GraphError::Connection("No graph URI configured".to_string()))?;

                let mut builder = ConfigBuilder::default()
                    .uri(uri)
                    .user(self.settings.user.as_deref().unwrap_or("neo4j"))
                    .password(self.settings.password.as_deref().unwrap_or_default())
                    .max_connections(self.settings.max_connections.max(1));
                if let Some(db) = self.settings.database.as_deref() {
                    builder = builder.db(db);
                }
                let config = builder.build().map_err(classify)?;
                let graph = Graph::connect(config).await.map_err(classify)?;
                info!(uri = %uri, "Graph driver initialized");
                Ok::<Graph, GraphError>(graph)
            })
            .await
    }
}

#[async_trait::async_trait]
impl GraphBackend for Neo4jBackend {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn open_session(&self) -> Result<Box<dyn GraphSession>, GraphError> {
        let graph = self.graph().await?.clone();
        // Surface unreachable servers and bad credentials here, not mid-file
        graph.run(query("RETURN 1")).await.map_err(|e| match classify(e) {
            GraphError::Query(msg) => GraphError::Connection(msg),
            other => other,
        })?;
        Ok(Box::new(Neo4jSession { graph }))
    }
}

/// One worker's handle; every write is its own transaction
pub struct Neo4jSession {
    graph: Graph,
}

impl Neo4jSession {
    /// Run a write returning a single row of integer columns
    async fn write_counts(&self, q: Query, columns: &[&str]) -> Result<Vec<i64>, GraphError> {
        let mut txn = self.graph.start_txn().await.map_err(classify)?;
        let mut stream = txn.execute(q).await.map_err(classify)?;

        let mut values = vec![0; columns.len()];
        while let Some(row) = stream.next(txn.handle()).await.map_err(classify)? {
            for (value, column) in values.iter_mut().zip(columns) {
                // Aggregates over zero input rows still yield one row of zeros
                *value += row.get::<i64>(column).unwrap_or(0);
            }
        }
        txn.commit().await.map_err(classify)?;
        Ok(values)
    }
}

#[async_trait::async_trait]
impl GraphSession for Neo4jSession {
    async fn ensure_schema(&mut self, schema: &GraphSchema) -> Result<(), GraphError> {
        for statement in cypher::schema_statements(schema)? {
            debug!(statement = %statement, "Ensuring schema object");
            self.graph
                .run(query(&statement))
                .await
                .map_err(|e| GraphError::Schema(e.to_string()))?;
        }
        Ok(())
    }

    async fn merge_summary_nodes(
        &mut self,
        schema: &GraphSchema,
        keys: &[String],
    ) -> Result<WriteCounters, GraphError> {
        if keys.is_empty() {
            return Ok(WriteCounters::default());
        }
        let q = query(&cypher::merge_summary_nodes(schema)?).param("keys", keys.to_vec());
        let counts = self.write_counts(q, &["nodes_created"]).await?;
        Ok(WriteCounters {
            nodes_created: counts[0].max(0) as u64,
            ..WriteCounters::default()
        })
    }

    async fn merge_detail_batch(
        &mut self,
        schema: &GraphSchema,
        rows: &[DetailRecord],
    ) -> Result<WriteCounters, GraphError> {
        // A repeated id inside one statement would see the creation marker twice
        let mut ids = HashSet::new();
        let mut list = BoltList::new();
        for row in rows.iter().filter(|r| ids.insert(r.id.as_str())) {
            list.push(BoltType::Map(row_param(row)));
        }
        let sent = list.len() as u64;
        if sent == 0 {
            return Ok(WriteCounters::default());
        }

        let q = query(&cypher::merge_detail_batch(schema)?).param("rows", BoltType::List(list));
        let counts = self
            .write_counts(q, &["matched", "nodes_created", "relationships_created"])
            .await?;
        let matched = counts[0].max(0) as u64;
        Ok(WriteCounters {
            nodes_created: counts[1].max(0) as u64,
            relationships_created: counts[2].max(0) as u64,
            rows_matched: matched,
            rows_skipped: sent.saturating_sub(matched),
        })
    }

    async fn run_post_load(
        &mut self,
        schema: &GraphSchema,
        pass: &PostLoadPass,
    ) -> Result<WriteCounters, GraphError> {
        match pass {
            PostLoadPass::Aggregate { measures } => {
                let measures = if measures.is_empty() {
                    &schema.measure_fields
                } else {
                    measures
                };
                let q = query(&cypher::aggregate_pass(schema, measures)?);
                let counts = self.write_counts(q, &["summaries"]).await?;
                Ok(WriteCounters {
                    rows_matched: counts[0].max(0) as u64,
                    ..WriteCounters::default()
                })
            }
            PostLoadPass::LinkSummaries {
                via_field,
                relationship,
            } => {
                let q = query(&cypher::link_summaries_pass(schema, via_field, relationship)?);
                let counts = self.write_counts(q, &["relationships_created"]).await?;
                Ok(WriteCounters {
                    relationships_created: counts[0].max(0) as u64,
                    ..WriteCounters::default()
                })
            }
        }
    }
}

/// `{id, summary_key, props}` parameter for one detail row
fn row_param(row: &DetailRecord) -> BoltMap {
    let mut props = BoltMap::new();
    for (name, value) in &row.properties {
        props.put(BoltString::from(name.as_str()), bolt_value(value));
    }

    let mut map = BoltMap::new();
    map.put(BoltString::from("id"), BoltType::String(BoltString::from(row.id.as_str())));
    map.put(
        BoltString::from("summary_key"),
        BoltType::String(BoltString::from(row.summary_key.as_str())),
    );
    map.put(BoltString::from("props"), BoltType::Map(props));
    map
}

fn bolt_value(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Null => BoltType::Null(BoltNull),
        PropertyValue::Float(v) => BoltType::Float(BoltFloat::new(*v)),
        PropertyValue::Text(s) => BoltType::String(BoltString::from(s.as_str())),
    }
}

/// Split driver errors into connection-level and statement-level
fn classify(err: neo4rs::Error) -> GraphError {
    match err {
        neo4rs::Error::IOError { .. }
        | neo4rs::Error::ConnectionError
        | neo4rs::Error::AuthenticationError(_)
        | neo4rs::Error::UrlParseError(_)
        | neo4rs::Error::UnsupportedScheme(_) => GraphError::Connection(err.to_string()),
        other => GraphError::Query(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_row_param_shape() {
        let mut properties = BTreeMap::new();
        properties.insert("transaction_id".to_string(), PropertyValue::Text("T1".into()));
        properties.insert("mtm_usd_amount".to_string(), PropertyValue::Float(5.0));
        properties.insert("desk".to_string(), PropertyValue::Null);
        let row = DetailRecord {
            id: "T1".into(),
            summary_key: "G1".into(),
            properties,
        };

        let map = row_param(&row);
        assert_eq!(map.value.len(), 3);
        match map.value.get(&BoltString::from("props")) {
            Some(BoltType::Map(props)) => assert_eq!(props.value.len(), 3),
            other => panic!("unexpected props: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_uri_is_connection_error() {
        let backend = Neo4jBackend::new(GraphSettings::default());
        let err = backend.open_session().await.err().unwrap();
        assert!(err.is_connection());
    }
}
